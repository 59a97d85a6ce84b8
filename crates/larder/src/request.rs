// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// A request for the entity stored under a key, with options controlling when the store fetches.
///
/// Every store operation accepts `impl Into<StoreRequest<K>>`, so a bare key can be passed
/// wherever the default options are wanted.
///
/// # Examples
///
/// ```
/// use larder::StoreRequest;
///
/// let request = StoreRequest::new("posts/1").refresh(true).emit_loading_states(true);
///
/// assert!(request.is_refresh());
/// assert!(request.is_fetch_when_no_data_found());
/// assert!(!request.is_force_fetch());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest<K> {
    key: K,
    refresh: bool,
    fetch_when_no_data_found: bool,
    force_fetch: bool,
    emit_no_data_states: bool,
    emit_loading_states: bool,
}

impl<K> StoreRequest<K> {
    /// Creates a request for `key` with default options.
    #[must_use]
    pub fn new(key: K) -> Self {
        Self {
            key,
            refresh: false,
            fetch_when_no_data_found: true,
            force_fetch: false,
            emit_no_data_states: false,
            emit_loading_states: false,
        }
    }

    /// When streaming a key that is already stored, also fetch it in the background.
    #[must_use]
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Fetch when nothing is stored for the key. Enabled by default.
    #[must_use]
    pub fn fetch_when_no_data_found(mut self, fetch: bool) -> Self {
        self.fetch_when_no_data_found = fetch;
        self
    }

    /// Bypass the rate limiter for fetches issued by this request.
    #[must_use]
    pub fn force_fetch(mut self, force: bool) -> Self {
        self.force_fetch = force;
        self
    }

    /// Emit [`StoreResponse::NoData`][crate::StoreResponse::NoData] on streams.
    #[must_use]
    pub fn emit_no_data_states(mut self, emit: bool) -> Self {
        self.emit_no_data_states = emit;
        self
    }

    /// Emit [`StoreResponse::Loading`][crate::StoreResponse::Loading] on streams before fetching.
    #[must_use]
    pub fn emit_loading_states(mut self, emit: bool) -> Self {
        self.emit_loading_states = emit;
        self
    }

    /// The requested key.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// See [`Self::refresh`].
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        self.refresh
    }

    /// See [`Self::fetch_when_no_data_found`].
    #[must_use]
    pub fn is_fetch_when_no_data_found(&self) -> bool {
        self.fetch_when_no_data_found
    }

    /// See [`Self::force_fetch`].
    #[must_use]
    pub fn is_force_fetch(&self) -> bool {
        self.force_fetch
    }

    /// See [`Self::emit_no_data_states`].
    #[must_use]
    pub fn is_emit_no_data_states(&self) -> bool {
        self.emit_no_data_states
    }

    /// See [`Self::emit_loading_states`].
    #[must_use]
    pub fn is_emit_loading_states(&self) -> bool {
        self.emit_loading_states
    }

    pub(crate) fn into_key(self) -> K {
        self.key
    }
}

impl<K> From<K> for StoreRequest<K> {
    fn from(key: K) -> Self {
        Self::new(key)
    }
}
