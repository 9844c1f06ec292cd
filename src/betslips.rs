use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::ledger::Ledger;
use crate::pagination::{PageSource, PageWalker, SortOrder};
use crate::records::BetSlipRecord;
use crate::session::{Session, Tab, DEFAULT_WAIT};

const REPORT_BUTTON: &str = r#"button[action="/Report/BettingReportIndex"]"#;
const REPORT_LENGTH_SELECT: &str = "select[name=tblBettingReport_length]";
const REPORT_ID_HEADER: &str = "#tblBettingReport > thead > tr > th:nth-child(1)";
const REPORT_ROWS: &str = "#tblBettingReport tbody > tr";
const REPORT_NEXT: &str = "#tblBettingReport_next";

const DETAILS_IFRAME: &str = "div.ui-dialog iframe";
const DIALOG_CLOSE: &str = "body > div.ui-dialog.ui-widget.ui-widget-content.ui-corner-all.ui-front.ui-draggable.ui-resizable > div.ui-dialog-titlebar.ui-widget-header.ui-corner-all.ui-helper-clearfix.ui-draggable-handle > button";

/// One row of the betting report: bet-slip id, owning user id, and the row
/// position holding the details link. The locator is only valid while the
/// current page is displayed.
#[derive(Debug, Clone, Deserialize)]
struct BetSlipRef {
    #[serde(rename = "betSlipId")]
    bet_slip_id: String,
    #[serde(rename = "userId")]
    user_id: String,
    row: usize,
}

/// Walk the betting report and export every bet slip that has no file yet.
///
/// Unlike the user-list scraper this flow has no attempt budget: it skips by
/// file existence only, so a slip whose extraction keeps crashing is retried
/// on every run.
pub async fn scrape_bet_slips(session: &Session, config: &Config, order: SortOrder) -> Result<()> {
    let tab = session.new_tab().await?;
    session.login(&tab, config).await?;

    info!("navigating to the betting report");
    tab.goto(&config.report_url()).await?;
    tab.wait_for_overlay_clear().await?;
    tab.settled(tab.click(REPORT_BUTTON)).await?;

    // Widen the date filter to cover everything.
    tab.eval::<bool>(
        r#"
        (() => {
            document.querySelector('#tbFrom').value = '2000/01/01 00:00';
            document.querySelector('#tbTo').value = '2030/01/01 00:00';
            return true;
        })()
        "#,
    )
    .await?;
    tab.settled(tab.click("#btnFilterReport")).await?;

    tab.settled(tab.select_value(REPORT_LENGTH_SELECT, "100")).await?;

    info!(?order, "sorting bet slips by id");
    for _ in 0..order.toggle_clicks() {
        tab.settled(tab.click(REPORT_ID_HEADER)).await?;
    }

    let ledger = Ledger::new(&config.export_root);
    let mut walker = PageWalker::new(ReportTable { tab: &tab });

    while let Some(slips) = walker.next_batch().await? {
        info!(
            page = walker.pages_visited(),
            count = slips.len(),
            "found bet slip rows"
        );
        for slip in slips {
            if ledger.has_betslip(&slip.user_id, &slip.bet_slip_id) {
                info!(
                    bet_slip_id = %slip.bet_slip_id,
                    user_id = %slip.user_id,
                    "bet slip data file already exists, skip"
                );
                continue;
            }
            let record = scrape_bet_slip(&tab, &slip).await?;
            ledger.record_betslip(&slip.user_id, &slip.bet_slip_id, &record)?;
        }
    }

    info!("reached last page");
    tab.close().await?;
    Ok(())
}

/// Open the details dialog for one row, read the three tables inside its
/// iframe, and close the dialog again.
async fn scrape_bet_slip(tab: &Tab, slip: &BetSlipRef) -> Result<BetSlipRecord> {
    info!(bet_slip_id = %slip.bet_slip_id, user_id = %slip.user_id, "scraping bet slip");

    let details = tab
        .expect_response(&format!("betSlipGroupId={}", slip.bet_slip_id))
        .await?;

    debug!(row = slip.row, "clicking on the details button");
    let clicked: bool = tab
        .eval(&format!(
            r#"
            (() => {{
                const rows = document.querySelectorAll('{REPORT_ROWS}');
                if (rows.length <= {row}) return false;
                const link = rows[{row}].querySelector('a');
                if (!link) return false;
                link.click();
                return true;
            }})()
            "#,
            row = slip.row,
        ))
        .await?;
    if !clicked {
        anyhow::bail!("details link for bet slip {} not found", slip.bet_slip_id);
    }

    details.wait(DEFAULT_WAIT).await.context("bet slip details")?;

    // The dialog content is a same-origin iframe; wait for its bet table.
    tab.wait_for_js(
        "bet slip details frame",
        &format!(
            r#"
            (() => {{
                const frame = document.querySelector('{DETAILS_IFRAME}');
                if (!frame || !frame.contentDocument) return false;
                return frame.contentDocument.querySelector('#TableBet') !== null;
            }})()
            "#
        ),
        DEFAULT_WAIT,
    )
    .await?;

    let record: BetSlipRecord = tab
        .eval(&format!(
            r#"
            (() => {{
                const doc = document.querySelector('{DETAILS_IFRAME}').contentDocument;
                const cell = (row, n) => row.querySelector(':nth-child(' + n + ')').innerText;

                const statusRow = doc.querySelector('#TableBet > tbody > tr.with-status');
                const stakesRow = doc.querySelector('#TableBetStakes > tbody > tr.with-status');

                return {{
                    status: {{
                        createdAt: cell(statusRow, 1),
                        currency: cell(statusRow, 2),
                        status: cell(statusRow, 3),
                    }},
                    selections: [...doc.querySelectorAll('#TableBetSelections > tbody > tr.with-status')]
                        .map(row => ({{
                            date: cell(row, 1),
                            event: cell(row, 2),
                            market: cell(row, 3),
                            pick: cell(row, 4),
                            status: cell(row, 5),
                        }})),
                    stakes: {{
                        betType: cell(stakesRow, 1),
                        noOfBets: cell(stakesRow, 2),
                        unitStake: cell(stakesRow, 3),
                        stake: cell(stakesRow, 4),
                        bonus: cell(stakesRow, 5),
                        potentialWinnings: cell(stakesRow, 6),
                        winnings: cell(stakesRow, 7),
                        status: cell(stakesRow, 8),
                        note: cell(stakesRow, 9),
                    }},
                }};
            }})()
            "#
        ))
        .await
        .context("bet slip tables")?;

    tab.click(DIALOG_CLOSE).await?;
    Ok(record)
}

/// The betting report table as a [`PageSource`].
struct ReportTable<'a> {
    tab: &'a Tab,
}

impl PageSource for ReportTable<'_> {
    type Item = BetSlipRef;

    async fn current_items(&mut self) -> Result<Vec<BetSlipRef>> {
        self.tab
            .eval(&format!(
                r#"
                [...document.querySelectorAll('{REPORT_ROWS}')]
                    .map((row, index) => ({{
                        betSlipId: row.querySelector(':nth-child(1)').innerText.trim(),
                        userId: row.querySelector(':nth-child(3)').innerText.trim(),
                        row: index,
                    }}))
                "#
            ))
            .await
    }

    async fn has_next(&mut self) -> Result<bool> {
        self.tab
            .eval(&format!(
                "document.querySelector('{REPORT_NEXT}.disabled') === null"
            ))
            .await
    }

    async fn advance(&mut self) -> Result<()> {
        self.tab.settled(self.tab.click(REPORT_NEXT)).await
    }
}
