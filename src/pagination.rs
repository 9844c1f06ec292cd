use anyhow::Result;
use clap::ValueEnum;

/// Sort direction of the entity-id column, applied exactly once before the
/// walk starts. The column toggles on click, so `desc` is one extra click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn toggle_clicks(self) -> usize {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => 2,
        }
    }
}

/// One paginated admin table as seen from the current browser page.
///
/// Implementations are table-specific selector glue; the walk itself lives
/// in [`PageWalker`]. `advance` failures are fatal for the run: skipping a
/// page silently would make "done" meaningless.
#[allow(async_fn_in_trait)]
pub trait PageSource {
    type Item;

    /// Entity references on the currently displayed page, in table order.
    async fn current_items(&mut self) -> Result<Vec<Self::Item>>;

    /// Whether the next-page control is enabled. Its disabled state is the
    /// sole termination signal.
    async fn has_next(&mut self) -> Result<bool>;

    /// Move to the next page and wait for it to settle.
    async fn advance(&mut self) -> Result<()>;
}

/// Forward-only, lazy walk over a [`PageSource`]; yields one batch per page
/// until the next control is observed disabled. No back-paging, no page
/// counting, no re-sorting mid-walk.
pub struct PageWalker<S> {
    source: S,
    started: bool,
    exhausted: bool,
    pages_visited: usize,
}

impl<S: PageSource> PageWalker<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            started: false,
            exhausted: false,
            pages_visited: 0,
        }
    }

    /// Next page's batch, or `None` once the table is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<S::Item>>> {
        if self.exhausted {
            return Ok(None);
        }
        if self.started {
            if !self.source.has_next().await? {
                self.exhausted = true;
                return Ok(None);
            }
            self.source.advance().await?;
        }
        self.started = true;
        self.pages_visited += 1;
        let items = self.source.current_items().await?;
        Ok(Some(items))
    }

    pub fn pages_visited(&self) -> usize {
        self.pages_visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    /// In-memory stand-in for a paginated table: last page reports no next.
    struct FakeTable {
        pages: Vec<Vec<u32>>,
        current: usize,
        advance_calls: usize,
        fail_on_advance: bool,
    }

    impl FakeTable {
        fn new(pages: Vec<Vec<u32>>) -> Self {
            Self {
                pages,
                current: 0,
                advance_calls: 0,
                fail_on_advance: false,
            }
        }
    }

    impl PageSource for FakeTable {
        type Item = u32;

        async fn current_items(&mut self) -> Result<Vec<u32>> {
            Ok(self.pages[self.current].clone())
        }

        async fn has_next(&mut self) -> Result<bool> {
            Ok(self.current + 1 < self.pages.len())
        }

        async fn advance(&mut self) -> Result<()> {
            if self.fail_on_advance {
                bail!("navigation timed out");
            }
            self.advance_calls += 1;
            self.current += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn visits_exactly_n_pages() {
        let table = FakeTable::new(vec![vec![1, 2], vec![3, 4], vec![5]]);
        let mut walker = PageWalker::new(table);

        let mut batches = Vec::new();
        while let Some(batch) = walker.next_batch().await.unwrap() {
            batches.push(batch);
        }

        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert_eq!(walker.pages_visited(), 3);
        // Exhaustion is sticky.
        assert!(walker.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn single_page_table_never_advances() {
        let table = FakeTable::new(vec![vec![7]]);
        let mut walker = PageWalker::new(table);

        assert_eq!(walker.next_batch().await.unwrap(), Some(vec![7]));
        assert!(walker.next_batch().await.unwrap().is_none());
        assert_eq!(walker.source.advance_calls, 0);
    }

    #[tokio::test]
    async fn advance_failure_is_propagated_not_skipped() {
        let mut table = FakeTable::new(vec![vec![1], vec![2]]);
        table.fail_on_advance = true;
        let mut walker = PageWalker::new(table);

        assert!(walker.next_batch().await.unwrap().is_some());
        assert!(walker.next_batch().await.is_err());
    }

    #[test]
    fn desc_is_exactly_one_extra_ordering_action() {
        assert_eq!(SortOrder::Desc.toggle_clicks(), SortOrder::Asc.toggle_clicks() + 1);
    }

    #[tokio::test]
    async fn resumed_run_skips_completed_entities() {
        use crate::ledger::{EntryState, Ledger};
        use serde_json::json;

        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());

        // First run: three entities across two pages, crashed right after
        // finishing the first one.
        ledger.record_attempt("1").unwrap();
        ledger.record_success("1", &json!({"id": "1"})).unwrap();

        // Second run walks the same table and only attempts what is owed.
        let table = FakeTable::new(vec![vec![1, 2], vec![3]]);
        let mut walker = PageWalker::new(table);
        let mut attempted = Vec::new();
        while let Some(batch) = walker.next_batch().await.unwrap() {
            for id in batch {
                let id = id.to_string();
                if !ledger.should_attempt(&id).unwrap() {
                    continue;
                }
                ledger.record_attempt(&id).unwrap();
                ledger.record_success(&id, &json!({ "id": id })).unwrap();
                attempted.push(id);
            }
        }

        assert_eq!(attempted, vec!["2", "3"]);
        assert_eq!(ledger.state("1").unwrap(), EntryState::Done);
        assert_eq!(walker.pages_visited(), 2);
    }
}
