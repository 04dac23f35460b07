use std::collections::BTreeSet;
use std::sync::Arc;

use logsieve_types::{MessageEvent, StreamEntry};

use crate::bundle::BundleIdentityResolver;
use crate::text::TextMatcher;

type Matcher = Arc<dyn TextMatcher>;

/// Predicate deciding which stream entries are kept.
///
/// Every criterion is optional; an unset criterion always passes. Active
/// criteria are combined with AND only. Filters are built once and shared
/// read-only between workers; to change settings, build a new filter and
/// swap it in.
#[derive(Clone)]
pub struct EntryFilter {
    message_text: Option<Matcher>,
    process: Option<Matcher>,
    subsystem: Option<Matcher>,
    category: Option<Matcher>,

    /// Process ID to match exactly
    process_id: Option<i32>,

    /// Bundle identifier to match, never empty or padded
    bundle_identifier: Option<String>,

    /// Message types to keep
    accepted_types: BTreeSet<MessageEvent>,

    /// Sorted raw tags of `accepted_types`, searched on the hot path.
    /// Only `set_accepted_types` writes either field.
    accepted_raw: Vec<u8>,

    resolver: Arc<BundleIdentityResolver>,
}

impl EntryFilter {
    /// Create a filter that accepts every entry, resolving bundle
    /// identifiers through `resolver`
    pub fn new(resolver: Arc<BundleIdentityResolver>) -> Self {
        let mut filter = Self {
            message_text: None,
            process: None,
            subsystem: None,
            category: None,
            process_id: None,
            bundle_identifier: None,
            accepted_types: BTreeSet::new(),
            accepted_raw: Vec::new(),
            resolver,
        };
        filter.set_accepted_types(MessageEvent::ALL);
        filter
    }

    pub fn with_message_text(mut self, matcher: impl TextMatcher + 'static) -> Self {
        self.message_text = Some(Arc::new(matcher));
        self
    }

    pub fn with_process(mut self, matcher: impl TextMatcher + 'static) -> Self {
        self.process = Some(Arc::new(matcher));
        self
    }

    pub fn with_subsystem(mut self, matcher: impl TextMatcher + 'static) -> Self {
        self.subsystem = Some(Arc::new(matcher));
        self
    }

    pub fn with_category(mut self, matcher: impl TextMatcher + 'static) -> Self {
        self.category = Some(Arc::new(matcher));
        self
    }

    pub fn with_process_id(mut self, pid: Option<i32>) -> Self {
        self.process_id = pid;
        self
    }

    /// Restrict to entries from the app with this bundle identifier.
    /// Blank identifiers clear the restriction.
    pub fn with_bundle_identifier(mut self, bundle_id: Option<&str>) -> Self {
        self.bundle_identifier = bundle_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        self
    }

    pub fn with_accepted_types(mut self, types: impl IntoIterator<Item = MessageEvent>) -> Self {
        self.set_accepted_types(types);
        self
    }

    /// Replace the accepted message types
    pub fn set_accepted_types(&mut self, types: impl IntoIterator<Item = MessageEvent>) {
        self.accepted_types = types.into_iter().collect();
        // BTreeSet iterates in tag order, so the projection is already sorted
        self.accepted_raw = self.accepted_types.iter().map(|t| t.raw()).collect();
    }

    pub fn accepted_types(&self) -> &BTreeSet<MessageEvent> {
        &self.accepted_types
    }

    pub fn accepted_raw_tags(&self) -> &[u8] {
        &self.accepted_raw
    }

    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    pub fn bundle_identifier(&self) -> Option<&str> {
        self.bundle_identifier.as_deref()
    }

    pub fn resolver(&self) -> &Arc<BundleIdentityResolver> {
        &self.resolver
    }

    /// Check if a stream entry passes every active criterion
    pub fn matches(&self, entry: &StreamEntry) -> bool {
        if self
            .accepted_raw
            .binary_search(&entry.message_type.raw())
            .is_err()
        {
            return false;
        }

        if self.process_id.is_some_and(|pid| pid != entry.process_id) {
            return false;
        }

        let text_checks = [
            (&self.message_text, entry.message.as_str()),
            (&self.subsystem, entry.subsystem.as_str()),
            (&self.category, entry.category.as_str()),
            (&self.process, entry.process.as_str()),
        ];
        for (matcher, candidate) in text_checks {
            if matcher.as_ref().is_some_and(|m| !m.matches(candidate)) {
                return false;
            }
        }

        match &self.bundle_identifier {
            Some(want) => {
                self.resolver.resolve(&entry.process_image_path).as_deref() == Some(want.as_str())
            }
            None => true,
        }
    }

    /// Check if the filter lets every entry through
    pub fn is_unrestricted(&self) -> bool {
        self.message_text.is_none()
            && self.process.is_none()
            && self.subsystem.is_none()
            && self.category.is_none()
            && self.process_id.is_none()
            && self.bundle_identifier.is_none()
            && self.accepted_types.len() == MessageEvent::ALL.len()
    }
}

impl Default for EntryFilter {
    fn default() -> Self {
        Self::new(BundleIdentityResolver::shared())
    }
}

impl std::fmt::Debug for EntryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryFilter")
            .field("message_text", &self.message_text.is_some())
            .field("process", &self.process.is_some())
            .field("subsystem", &self.subsystem.is_some())
            .field("category", &self.category.is_some())
            .field("process_id", &self.process_id)
            .field("bundle_identifier", &self.bundle_identifier)
            .field("accepted_types", &self.accepted_types)
            .finish()
    }
}
