//! Lazy traversal of list endpoints.

use crate::error::{ClientError, ClientResult};
use crate::http::HttpClient;
use crate::transport::Transport;
use starpass_protocol::{ApiRequest, Cursor, Page};
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug)]
enum WalkState {
    /// Next fetch uses this cursor (`None` for the first page).
    Fetch(Option<Cursor>),
    /// The last page repeated a visited cursor; report it on the next call.
    Looped(Cursor),
    Done,
}

/// Iterator over the pages of a list endpoint.
///
/// Each call to `next` fetches one page through the transport, so pages
/// arrive strictly in cursor order. The walk ends on an empty page or a
/// missing cursor. An error ends it too; pages already yielded stay valid.
pub struct Pages<'t, C: HttpClient> {
    transport: &'t Transport<C>,
    request: ApiRequest,
    state: WalkState,
    visited: HashSet<Cursor>,
    fetched: usize,
}

impl<'t, C: HttpClient> Pages<'t, C> {
    pub(crate) fn new(transport: &'t Transport<C>, request: ApiRequest, start: Option<Cursor>) -> Self {
        // An uncursored first request is page 1
        let mut visited = HashSet::new();
        visited.insert(start.clone().unwrap_or(Cursor::Page(1)));
        Self {
            transport,
            request,
            state: WalkState::Fetch(start),
            visited,
            fetched: 0,
        }
    }

    /// Returns the cursor the next fetch would use.
    ///
    /// Capture it to resume an interrupted walk with `Transport::pages_from`.
    pub fn resume_cursor(&self) -> Option<&Cursor> {
        match &self.state {
            WalkState::Fetch(cursor) => cursor.as_ref(),
            _ => None,
        }
    }

    /// Returns the number of pages fetched so far.
    pub fn fetched(&self) -> usize {
        self.fetched
    }

    /// Collects every record of the remaining pages.
    pub fn records(self) -> ClientResult<Vec<starpass_protocol::RemoteRecord>> {
        let mut records = Vec::new();
        for page in self {
            records.extend(page?.records);
        }
        Ok(records)
    }

    fn fetch(&mut self, cursor: Option<Cursor>) -> ClientResult<Page> {
        let request = match &cursor {
            Some(cursor) => cursor.apply(self.request.clone()),
            None => self.request.clone(),
        };
        debug!(%request, cursor = ?cursor, "fetching page");
        let page = self.transport.fetch_page(&request)?;
        self.fetched += 1;
        Ok(page)
    }
}

impl<C: HttpClient> Iterator for Pages<'_, C> {
    type Item = ClientResult<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = match std::mem::replace(&mut self.state, WalkState::Done) {
            WalkState::Fetch(cursor) => cursor,
            WalkState::Looped(cursor) => {
                warn!(%cursor, "continuation cursor repeats an earlier page");
                return Some(Err(ClientError::Decode(format!(
                    "continuation cursor {cursor} was already visited"
                ))));
            }
            WalkState::Done => return None,
        };

        let page = match self.fetch(cursor) {
            Ok(page) => page,
            Err(err) => return Some(Err(err)),
        };
        if page.is_empty() {
            return None;
        }

        self.state = match &page.next {
            None => WalkState::Done,
            Some(next) if !self.visited.insert(next.clone()) => WalkState::Looped(next.clone()),
            Some(next) => WalkState::Fetch(Some(next.clone())),
        };
        Some(Ok(page))
    }
}
