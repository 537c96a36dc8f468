//! Target-line filter
//!
//! A deployment handles only its own lines. Notifications for other lines are
//! acknowledged and dropped without touching the store.

use callflow_common::phone::same_line;

/// Allow-list of internal lines / called numbers
#[derive(Debug, Clone, Default)]
pub struct LineFilter {
    targets: Vec<String>,
}

impl LineFilter {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.trim().is_empty())
                .collect(),
        }
    }

    /// An empty allow-list accepts everything
    pub fn is_open(&self) -> bool {
        self.targets.is_empty()
    }

    /// Whether the internal line or the called number is one of ours
    ///
    /// With a configured allow-list, a notification carrying neither field is rejected.
    pub fn accepts(&self, internal_line: Option<&str>, callee_number: Option<&str>) -> bool {
        if self.is_open() {
            return true;
        }

        [internal_line, callee_number]
            .into_iter()
            .flatten()
            .any(|value| self.targets.iter().any(|target| same_line(target, value)))
    }
}
