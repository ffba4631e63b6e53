use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::{
    base::types::{Event, Res, Void},
    model::report::Feedback,
};

pub mod surreal;

// Traits.

/// Generic database client trait that clients must implement.
///
/// This trait defines the storage of the analysis results, so that a build is
/// only analyzed once per workflow, and of the job descriptions.
#[async_trait]
pub trait GenericDbClient: Send + Sync + 'static {
    /// Get the events of a report.
    ///
    /// A missing report is registered, `None` is returned until its events are set.
    async fn get_report(&self, workflow: &str, build: &str) -> Res<Option<Vec<Event>>>;

    /// Store the events of a report.
    async fn set_report(&self, workflow: &str, build: &str, events: &[Event]) -> Void;

    /// Get the events of a job description.
    ///
    /// Descriptions older than a day are ignored, so that they follow the job changes.
    async fn get_job(&self, name: &str) -> Res<Option<Vec<Event>>>;

    /// Store the events of a job description.
    async fn set_job(&self, name: &str, events: &[Event]) -> Void;

    /// Record a user feedback about a report.
    async fn add_feedback(&self, workflow: &str, build: &str, feedback: &Feedback) -> Void;

    /// The feedbacks of a report, oldest first.
    async fn list_feedback(&self, workflow: &str, build: &str) -> Res<Vec<Feedback>>;
}

// Structs.

/// Database client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct DbClient {
    inner: Arc<dyn GenericDbClient>,
}

impl DbClient {
    pub fn new(inner: Arc<dyn GenericDbClient>) -> Self {
        Self { inner }
    }
}

impl Deref for DbClient {
    type Target = dyn GenericDbClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}
