//! Async facade over the engine components
//!
//! Store calls block, so every write and point read runs on tokio's
//! blocking pool. Timeline reads do their own scheduling.

use crate::clock::{Clock, SystemClock};
use crate::config::TimelineConfig;
use crate::error::TimelineResult;
use crate::fanout::FanoutEngine;
use crate::graph::SocialGraph;
use crate::identity::IdentityRegistry;
use crate::models::{Post, PostId, User, UserId};
use crate::posts::PostStore;
use crate::reader::{TimelinePage, TimelineReader};
use crate::store::Store;
use std::sync::Arc;

pub struct TimelineService<S> {
    inner: Arc<Components<S>>,
}

impl<S> Clone for TimelineService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Components<S> {
    store: Arc<S>,
    identity: IdentityRegistry<S>,
    graph: SocialGraph<S>,
    posts: Arc<PostStore<S>>,
    fanout: FanoutEngine<S>,
    reader: TimelineReader<S>,
}

impl<S: Store> TimelineService<S> {
    pub fn new(store: S, config: &TimelineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: &TimelineConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(store);
        let posts = Arc::new(PostStore::new(Arc::clone(&store), Arc::clone(&clock)));
        let components = Components {
            identity: IdentityRegistry::new(Arc::clone(&store), Arc::clone(&clock)),
            graph: SocialGraph::new(Arc::clone(&store), clock),
            fanout: FanoutEngine::new(
                Arc::clone(&store),
                Arc::clone(&posts),
                config.fanout_batch_size,
            ),
            reader: TimelineReader::new(Arc::clone(&store), config.fetch_timeout),
            posts,
            store,
        };
        Self {
            inner: Arc::new(components),
        }
    }

    pub fn identity(&self) -> &IdentityRegistry<S> {
        &self.inner.identity
    }

    pub fn graph(&self) -> &SocialGraph<S> {
        &self.inner.graph
    }

    pub fn posts(&self) -> &PostStore<S> {
        &self.inner.posts
    }

    pub fn fanout(&self) -> &FanoutEngine<S> {
        &self.inner.fanout
    }

    pub fn reader(&self) -> &TimelineReader<S> {
        &self.inner.reader
    }

    async fn blocking<T, F>(&self, op: F) -> TimelineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Components<S>) -> TimelineResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner)).await?
    }

    pub async fn create_user(&self, login: String, name: String) -> TimelineResult<UserId> {
        self.blocking(move |c| c.identity.create_user(&login, &name)).await
    }

    pub async fn delete_user(&self, id: UserId) -> TimelineResult<bool> {
        self.blocking(move |c| c.identity.delete_user(id)).await
    }

    pub async fn get_user(&self, id: UserId) -> TimelineResult<User> {
        self.blocking(move |c| c.identity.get_user(id)).await
    }

    pub async fn get_user_by_login(&self, login: String) -> TimelineResult<User> {
        self.blocking(move |c| c.identity.get_user_by_login(&login)).await
    }

    pub async fn user_id_by_login(&self, login: String) -> TimelineResult<UserId> {
        self.blocking(move |c| c.identity.user_id_by_login(&login)).await
    }

    pub async fn follow(&self, follower: UserId, followee: UserId) -> TimelineResult<bool> {
        self.blocking(move |c| c.graph.follow(follower, followee)).await
    }

    pub async fn unfollow(&self, follower: UserId, followee: UserId) -> TimelineResult<bool> {
        self.blocking(move |c| c.graph.unfollow(follower, followee)).await
    }

    pub async fn is_following(&self, follower: UserId, followee: UserId) -> TimelineResult<bool> {
        self.blocking(move |c| c.graph.is_following(follower, followee)).await
    }

    pub async fn publish(&self, author: UserId, message: String) -> TimelineResult<PostId> {
        self.blocking(move |c| c.fanout.publish(author, &message)).await
    }

    pub async fn get_post(&self, id: PostId) -> TimelineResult<Post> {
        self.blocking(move |c| c.posts.get_post(id)).await
    }

    pub async fn get_timeline(
        &self,
        user: UserId,
        page: u32,
        page_size: u32,
    ) -> TimelineResult<TimelinePage> {
        self.inner.reader.get_timeline(user, page, page_size).await
    }

    /// Borrow (and so validate) one connection.
    pub async fn check_store(&self) -> TimelineResult<()> {
        self.blocking(|c| {
            c.store.acquire()?;
            Ok(())
        })
        .await
    }
}
