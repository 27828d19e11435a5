//! Task trait - binds a payload type to its task-type identifier.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A schedulable unit of work, identified by [`Task::TYPE`].
///
/// The payload is stored as JSON and decoded back into `Self` right before
/// the handler runs.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct PurgeCache {
///     older_than_days: u32,
/// }
///
/// impl Task for PurgeCache {
///     const TYPE: &'static str = "acme.cache.purge.v1";
///     const TITLE: &'static str = "Purge cache";
/// }
/// ```
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier, `{namespace}.{domain}.{action}.v{major}`.
    const TYPE: &'static str;

    /// Human-readable name shown in listings.
    const TITLE: &'static str = Self::TYPE;

    const DESCRIPTION: &'static str = "";

    /// The component that provides the task.
    const EXTENSION: &'static str = "core";
}
