use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ledger::{EntryState, Ledger, MAX_ATTEMPTS};
use crate::pagination::{PageSource, PageWalker, SortOrder};
use crate::records::{
    BalanceSnapshot, Bonuses, KycDocument, ProfileField, ResponsibleGaming, UserRecord,
};
use crate::session::{Session, Tab, DEFAULT_WAIT, LONG_WAIT};

const PLAYERS_FIRST_ROW: &str = "#tblPlayers > tbody > tr:nth-child(1)";
const PLAYERS_ID_HEADER: &str = "#tblPlayers > thead > tr > th:nth-child(1)";
const PLAYERS_LENGTH_SELECT: &str = "select[name=tblPlayers_length]";
const PLAYERS_LINKS: &str = "#tblPlayers tbody > tr > :nth-child(3) > a";
const PLAYERS_NEXT: &str = "#tblPlayers_next";

// The tab strip on the profile page hides most entries behind two dropdown
// toggles; these are their fixed positions in the vendor markup.
const TRANSACTIONS_MENU_BUTTON: &str = "body > div.page-container > div.page-content > div > div.row-new.clearfix.player-header > div.player-name-money.row-fluid > div.span8 > nav > div.pull-right > ul > li:nth-child(4) > div > div > button";
const BONUSES_MENU_BUTTON: &str = "body > div.page-container > div.page-content > div > div.row-new.clearfix.player-header > div.player-name-money.row-fluid > div.span8 > nav > div.pull-right > ul > li:nth-child(9) > button";
const RESTRICTIONS_BUTTON: &str = "#liRestrictions > button";

const KYC_PROCESSING: &str = "#tblKYCDocuments_processing";
const KYC_DOWNLOAD_BUTTONS: &str = "td.actionsWidth > a.btn.blue.mini:nth-child(1)";

/// A player reference from the list table: stable id plus the profile URL
/// the third column links to.
#[derive(Debug, Clone)]
pub struct UserRef {
    pub id: String,
    pub url: String,
}

/// Walk the paginated players table and scrape every player that the ledger
/// still owes an attempt.
pub async fn scrape_user_list(session: &Session, config: &Config, order: SortOrder) -> Result<()> {
    let tab = session.new_tab().await?;
    session.login(&tab, config).await?;

    tab.goto(&config.player_list_url()).await?;
    tab.wait_for_selector(PLAYERS_FIRST_ROW, DEFAULT_WAIT).await?;

    // Deterministic order, applied exactly once: the id column toggles per
    // click, so descending is one extra click.
    info!(?order, "sorting players by id");
    for _ in 0..order.toggle_clicks() {
        tab.settled(tab.click(PLAYERS_ID_HEADER)).await?;
    }

    // Maximal page size keeps the number of page transitions down.
    tab.settled(tab.select_value(PLAYERS_LENGTH_SELECT, "100")).await?;

    let ledger = Ledger::new(&config.export_root);
    let mut walker = PageWalker::new(PlayerTable { tab: &tab });

    while let Some(users) = walker.next_batch().await? {
        info!(
            page = walker.pages_visited(),
            count = users.len(),
            "found user links"
        );
        for user in users {
            process_user(session, &ledger, &user).await?;
        }
    }

    info!("reached last page");
    tab.close().await?;
    Ok(())
}

/// Ledger-gated attempt on one player. Terminal states are skipped, an
/// exhausted budget is converted into the terminal failure marker, and the
/// attempt is counted before extraction starts.
async fn process_user(session: &Session, ledger: &Ledger, user: &UserRef) -> Result<()> {
    match ledger.state(&user.id)? {
        EntryState::Done | EntryState::Failed => {
            info!(id = %user.id, "skipping user");
            return Ok(());
        }
        EntryState::Attempted(count) if count >= MAX_ATTEMPTS => {
            ledger.record_failure(&user.id)?;
            return Ok(());
        }
        _ => {}
    }

    ledger.record_attempt(&user.id)?;
    let record = scrape_user(session, ledger, user).await?;
    ledger.record_success(&user.id, &record)?;
    Ok(())
}

async fn scrape_user(session: &Session, ledger: &Ledger, user: &UserRef) -> Result<UserRecord> {
    info!(id = %user.id, "begin scraping user");

    let tab = session.new_tab().await?;
    let outcome = scrape_user_record(&tab, &ledger.entity_dir(&user.id), user).await;
    if let Err(e) = tab.close().await {
        warn!(id = %user.id, "failed to close user tab: {e:?}");
    }
    outcome
}

/// One full profile extraction, assembled from independent sub-extractions.
/// Any sub-extraction failure propagates and aborts the run; the attempt was
/// already counted, so the next invocation stays within budget.
async fn scrape_user_record(tab: &Tab, entity_dir: &Path, user: &UserRef) -> Result<UserRecord> {
    // The notes call fires during the initial page load; subscribe first.
    let notes_waiter = tab.expect_response("Notes/GetUserNotesData").await?;
    info!(url = %user.url, "navigating to user profile");
    tab.goto(&user.url).await?;

    let balance = scrape_balance(tab).await?;
    let profile = scrape_profile(tab).await?;
    let kyc_documents = scrape_kyc_documents(tab, entity_dir).await?;

    let user_notes = notes_waiter
        .wait_json(LONG_WAIT)
        .await
        .context("user notes response")?
        .get("data")
        .cloned()
        .unwrap_or(Value::Null);

    let vip_status: Value = tab
        .eval("Number(document.querySelector('#playerRating').dataset.score)")
        .await
        .context("vip status")?;

    let responsible_gaming = scrape_responsible_gaming(tab).await?;
    let bonuses = Bonuses {
        applicable: scrape_applicable_bonuses(tab).await?,
        current: scrape_current_bonuses(tab).await?,
    };
    let security_logs = scrape_security_logs(tab).await?;

    scrape_transactions(tab, entity_dir).await?;

    Ok(UserRecord {
        id: user.id.clone(),
        balance,
        profile,
        kyc_documents,
        user_notes,
        vip_status,
        responsible_gaming,
        bonuses,
        security_logs,
    })
}

async fn scrape_balance(tab: &Tab) -> Result<BalanceSnapshot> {
    debug!("scraping balance");
    tab.eval(
        r#"
        (() => {
            const text = id => {
                const el = document.getElementById(id);
                return el ? el.innerText : null;
            };
            return {
                balance: text('lblPlayerBalance'),
                real: text('lblPlayerRealBalance'),
                bonus: text('lblPlayerBonusBalance'),
            };
        })()
        "#,
    )
    .await
    .context("balance")
}

/// Visible form fields of the account-info tab, raw displayed values.
async fn scrape_profile(tab: &Tab) -> Result<Vec<ProfileField>> {
    info!("scraping user profile");
    let account_info = tab.expect_response("AccountInfo").await?;
    tab.click("#tab111linq").await?;
    account_info.wait(LONG_WAIT).await?;
    tab.wait_for_overlay_clear().await?;
    tab.wait_for_selector("#Username", DEFAULT_WAIT).await?;

    tab.eval(
        r#"
        (() => {
            const inputs = [...document.querySelectorAll('input')]
                .filter(el => el.type !== 'hidden')
                .map(input => ({
                    name: input.name,
                    value: input.type !== 'checkbox' ? input.value : input.checked,
                }))
                .filter(entry => Boolean(entry.name));

            const selects = [...document.querySelectorAll('select')]
                .map(el => {
                    const selected = el.options[el.selectedIndex];
                    return {
                        name: el.name || el.id,
                        value: selected ? selected.innerHTML : null,
                    };
                })
                .filter(entry => Boolean(entry.name));

            return [...inputs, ...selects];
        })()
        "#,
    )
    .await
    .context("profile fields")
}

/// KYC table rows plus the document binaries, downloaded into the entity
/// directory. A single failed download is logged and skipped; the row data
/// still records it.
async fn scrape_kyc_documents(tab: &Tab, entity_dir: &Path) -> Result<Vec<KycDocument>> {
    info!("scraping kyc documents");
    tab.wait_for_overlay_clear().await?;
    tab.wait_for_selector(RESTRICTIONS_BUTTON, DEFAULT_WAIT).await?;

    tab.click(RESTRICTIONS_BUTTON).await?;
    tab.click("#tab7linq").await?;

    // The processing spinner may be gone before the first poll sees it;
    // only its disappearance is load-bearing.
    if tab
        .wait_for_visible(KYC_PROCESSING, Duration::from_secs(5))
        .await
        .is_err()
    {
        debug!("kyc processing spinner not observed");
    }
    tab.wait_for_hidden(KYC_PROCESSING, DEFAULT_WAIT).await?;

    let button_count: usize = tab
        .eval(&format!(
            "document.querySelectorAll('{KYC_DOWNLOAD_BUTTONS}').length"
        ))
        .await?;
    info!(count = button_count, "found kyc download buttons");

    tokio::time::sleep(Duration::from_millis(500)).await;
    tab.set_download_dir(entity_dir).await?;

    for index in 0..button_count {
        let download = tab
            .expect_response_any(&["GetFile?userIdentificationDocumentId", "Error"])
            .await?;
        let clicked: bool = tab
            .eval(&format!(
                r#"
                (() => {{
                    const buttons = document.querySelectorAll('{KYC_DOWNLOAD_BUTTONS}');
                    if (buttons.length <= {index}) return false;
                    buttons[{index}].click();
                    return true;
                }})()
                "#
            ))
            .await?;
        if !clicked {
            warn!(index, "kyc download button vanished");
            continue;
        }
        debug!(index, "waiting for kyc document download");
        if let Err(e) = download.wait(DEFAULT_WAIT).await {
            warn!(index, "error while downloading kyc document: {e:?}");
        }
    }

    tab.eval(
        r#"
        [...document.querySelectorAll('#tblKYCDocuments tbody > tr')]
            .filter(row => row.childElementCount > 1)
            .map(row => ({
                filename: row.querySelector(':nth-child(1)').innerText,
                created: row.querySelector(':nth-child(8)').innerText,
                status: row.querySelector(':nth-child(13)').innerText,
            }))
        "#,
    )
    .await
    .context("kyc document rows")
}

/// The five limit tables behind the responsible-gaming accordion. Each click
/// triggers one backend call; unrelated calls fire concurrently, so every
/// section gets its own URL-fragment waiter.
async fn scrape_responsible_gaming(tab: &Tab) -> Result<ResponsibleGaming> {
    info!("scraping responsible gaming");
    tab.wait_for_selector(RESTRICTIONS_BUTTON, DEFAULT_WAIT).await?;
    tab.click(RESTRICTIONS_BUTTON).await?;
    tab.settled(tab.click("#tab8linq")).await?;

    let record = ResponsibleGaming {
        exclusion: limits_section(tab, "exclusion", "#tabExclusion").await?,
        transaction: limits_section(tab, "transaction", "#tabTransaction").await?,
        wagering: limits_section(tab, "wagering", "#tabWagering").await?,
        netloss: limits_section(tab, "netloss", "#tabNetLoss").await?,
        time: limits_section(tab, "time", "#tabTime").await?,
    };
    tab.wait_for_overlay_clear().await?;
    Ok(record)
}

/// Open one accordion section and take the `aaData` of the backend call the
/// click triggers.
async fn limits_section(tab: &Tab, kind: &str, accordion_id: &str) -> Result<Value> {
    debug!(kind, "opening limits section");
    tab.wait_for_overlay_clear().await?;
    let waiter = tab
        .expect_response(&format!("Player/GetUserLimitsTableByType?type={kind}"))
        .await?;
    let heading = format!("{accordion_id} > div.accordion-heading > span");
    tab.wait_for_selector(&heading, DEFAULT_WAIT).await?;
    tab.click(&heading).await?;
    let response = waiter
        .wait_json(LONG_WAIT)
        .await
        .with_context(|| format!("{kind} limits"))?;
    Ok(aa_data(response))
}

async fn scrape_applicable_bonuses(tab: &Tab) -> Result<Value> {
    info!("scraping applicable bonuses");
    tab.wait_for_overlay_clear().await?;
    tab.click(BONUSES_MENU_BUTTON).await?;

    let waiter = tab.expect_response("Player/GetApplicableUserBonuses").await?;
    tab.click("#tab14linq").await?;
    Ok(aa_data(waiter.wait_json(LONG_WAIT).await.context("applicable bonuses")?))
}

async fn scrape_current_bonuses(tab: &Tab) -> Result<Value> {
    info!("scraping current bonuses");
    tab.wait_for_overlay_clear().await?;
    tab.click(BONUSES_MENU_BUTTON).await?;
    tab.settled(tab.click("#tab13linq")).await?;

    // Maximal page size before reading, same policy as the main walker.
    let waiter = tab.expect_response("Player/GetUserBonuses").await?;
    tab.select_value("select[name=tblUserBonuses_length]", "100").await?;
    Ok(aa_data(waiter.wait_json(LONG_WAIT).await.context("current bonuses")?))
}

/// Security logs come from the DataTables endpoint directly: replay its POST
/// in page context with the display length raised high enough to cover the
/// whole table in one response.
async fn scrape_security_logs(tab: &Tab) -> Result<Value> {
    info!("scraping security logs");
    let waiter = tab.expect_response("Player/UserSecurityLogsData").await?;

    tab.eval::<bool>(
        r#"
        (() => {
            const queryString = 'sEcho=1&iColumns=8&sColumns=ID%2CType%2CIPAddress%2CDate%2CCountry%2CLoginAttemptResult%2CLoginAttemptReason%2CEnteredUsername&iDisplayStart=0&iDisplayLength=10&mDataProp_0=ID&bSortable_0=false&mDataProp_1=Type&bSortable_1=true&mDataProp_2=IPAddress&bSortable_2=true&mDataProp_3=Date&bSortable_3=true&mDataProp_4=Country&bSortable_4=false&mDataProp_5=LoginAttemptResult&bSortable_5=true&mDataProp_6=LoginAttemptReason&bSortable_6=true&mDataProp_7=EnteredUsername&bSortable_7=true&iSortCol_0=1&sSortDir_0=desc&iSortingCols=1';
            const searchParams = new URLSearchParams(queryString);
            searchParams.set('iDisplayLength', 9999);

            fetch('/Player/UserSecurityLogsData', {
                credentials: 'include',
                headers: {
                    'Accept': 'application/json',
                    'Content-Type': 'application/x-www-form-urlencoded; charset=UTF-8',
                },
                referrerPolicy: 'no-referrer-when-downgrade',
                body: searchParams.toString(),
                method: 'POST',
                mode: 'cors',
            });
            return true;
        })()
        "#,
    )
    .await?;

    Ok(aa_data(waiter.wait_json(LONG_WAIT).await.context("security logs")?))
}

/// Trigger the transactions CSV export into the entity directory. The file
/// lands via the browser's native download mechanism; nothing is returned.
async fn scrape_transactions(tab: &Tab, entity_dir: &Path) -> Result<()> {
    info!("scraping transactions");
    tab.wait_for_overlay_clear().await?;

    let loaded = tab.expect_response("Transaction/GetAllDepositsTransaction").await?;
    tab.click(TRANSACTIONS_MENU_BUTTON).await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    tab.click("#tab3linq").await?;
    loaded.wait(LONG_WAIT).await.context("transactions table")?;

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
    tab.settled(tab.click("#btnFilter")).await?;

    let download_button = "#ToolTables_tblTransactionsApproval_2";
    tab.wait_for_selector(download_button, DEFAULT_WAIT).await?;
    tab.set_download_dir(entity_dir).await?;

    let export = tab.expect_response("CSVExportAllTransactions").await?;
    tab.click(download_button).await?;
    debug!("waiting for the transactions export");
    export.wait(LONG_WAIT).await.context("transactions export")?;
    Ok(())
}

fn aa_data(response: Value) -> Value {
    response.get("aaData").cloned().unwrap_or(Value::Null)
}

/// The players table as a [`PageSource`]: third-column profile links are the
/// entity references, `#tblPlayers_next` carries the has-next signal.
struct PlayerTable<'a> {
    tab: &'a Tab,
}

impl PageSource for PlayerTable<'_> {
    type Item = UserRef;

    async fn current_items(&mut self) -> Result<Vec<UserRef>> {
        let links: Vec<String> = self
            .tab
            .eval(&format!(
                "Array.from(document.querySelectorAll('{PLAYERS_LINKS}')).map(a => a.href)"
            ))
            .await?;
        links
            .into_iter()
            .map(|url| {
                let id = query_param(&url, "id")
                    .with_context(|| format!("profile link without id: {url}"))?;
                Ok(UserRef { id, url })
            })
            .collect()
    }

    async fn has_next(&mut self) -> Result<bool> {
        self.tab
            .eval(&format!(
                "document.querySelector('{PLAYERS_NEXT}.disabled') === null"
            ))
            .await
    }

    async fn advance(&mut self) -> Result<()> {
        self.tab.settled(self.tab.click(PLAYERS_NEXT)).await
    }
}

/// Pull one query parameter out of an URL without dragging in a full URL
/// parser; the profile links are vendor-generated and well-formed.
fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    let query = query.split('#').next().unwrap_or(query);
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::query_param;

    #[test]
    fn query_param_extracts_the_id() {
        let url = "https://backoffice.example/Player/Details?foo=1&id=4711&bar=2";
        assert_eq!(query_param(url, "id").as_deref(), Some("4711"));
    }

    #[test]
    fn query_param_ignores_fragment_and_missing_values() {
        assert_eq!(
            query_param("https://x.example/p?id=9#section", "id").as_deref(),
            Some("9")
        );
        assert_eq!(query_param("https://x.example/p?id=", "id"), None);
        assert_eq!(query_param("https://x.example/p", "id"), None);
    }
}
