use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One scraped player record. Written exactly once to
/// `<export-root>/<id>/data.json` and never mutated afterwards.
///
/// Every displayed value is kept as the raw text the back office rendered;
/// nothing is parsed into numeric types here. Downstream consumers re-parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub balance: BalanceSnapshot,
    pub profile: Vec<ProfileField>,
    #[serde(rename = "kycDocuments")]
    pub kyc_documents: Vec<KycDocument>,
    #[serde(rename = "userNotes")]
    pub user_notes: Value,
    #[serde(rename = "vipStatus")]
    pub vip_status: Value,
    #[serde(rename = "responsibleGaming")]
    pub responsible_gaming: ResponsibleGaming,
    pub bonuses: Bonuses,
    #[serde(rename = "securityLogs")]
    pub security_logs: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub balance: Option<String>,
    pub real: Option<String>,
    pub bonus: Option<String>,
}

/// One visible form field from the account-info tab. Checkbox fields carry a
/// boolean value, everything else the raw input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileField {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycDocument {
    pub filename: String,
    pub created: String,
    pub status: String,
}

/// The five limit tables from the responsible-gaming tab, each the raw
/// `aaData` payload of its backing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsibleGaming {
    pub exclusion: Value,
    pub transaction: Value,
    pub wagering: Value,
    pub netloss: Value,
    pub time: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bonuses {
    pub applicable: Value,
    pub current: Value,
}

/// One bet slip, written to `<export-root>/<userID>/betslips/<betSlipID>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetSlipRecord {
    pub status: BetSlipStatus,
    pub selections: Vec<BetSlipSelection>,
    pub stakes: BetSlipStakes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetSlipStatus {
    #[serde(rename = "createdAt")]
    pub created_at: String,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetSlipSelection {
    pub date: String,
    pub event: String,
    pub market: String,
    pub pick: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetSlipStakes {
    #[serde(rename = "betType")]
    pub bet_type: String,
    #[serde(rename = "noOfBets")]
    pub no_of_bets: String,
    #[serde(rename = "unitStake")]
    pub unit_stake: String,
    pub stake: String,
    pub bonus: String,
    #[serde(rename = "potentialWinnings")]
    pub potential_winnings: String,
    pub winnings: String,
    pub status: String,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_user() -> UserRecord {
        UserRecord {
            id: "4711".into(),
            balance: BalanceSnapshot {
                balance: Some("1.234,56 €".into()),
                real: Some("1.000,00 €".into()),
                bonus: None,
            },
            profile: vec![
                ProfileField {
                    name: "Username".into(),
                    value: json!("player1"),
                },
                ProfileField {
                    name: "Newsletter".into(),
                    value: json!(true),
                },
            ],
            kyc_documents: vec![KycDocument {
                filename: "passport.png".into(),
                created: "2019-03-01".into(),
                status: "Approved".into(),
            }],
            user_notes: json!([{"Note": "called support"}]),
            vip_status: json!(3.5),
            responsible_gaming: ResponsibleGaming {
                exclusion: json!([]),
                transaction: json!([["100", "week"]]),
                wagering: Value::Null,
                netloss: json!([]),
                time: json!([]),
            },
            bonuses: Bonuses {
                applicable: json!([]),
                current: json!([{"BonusID": "9"}]),
            },
            security_logs: json!([{"IPAddress": "10.0.0.1"}]),
        }
    }

    #[test]
    fn user_record_round_trips_without_loss() {
        let record = sample_user();
        let text = serde_json::to_string_pretty(&record).unwrap();
        let back: UserRecord = serde_json::from_str(&text).unwrap();

        // Structural identity through the generic JSON representation.
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::to_value(&back).unwrap()
        );
    }

    #[test]
    fn user_record_uses_original_field_names() {
        let value = serde_json::to_value(sample_user()).unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            "id",
            "balance",
            "profile",
            "kycDocuments",
            "userNotes",
            "vipStatus",
            "responsibleGaming",
            "bonuses",
            "securityLogs",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
    }

    #[test]
    fn bet_slip_round_trips_without_loss() {
        let slip = BetSlipRecord {
            status: BetSlipStatus {
                created_at: "2020-01-01 10:00".into(),
                currency: "EUR".into(),
                status: "Won".into(),
            },
            selections: vec![BetSlipSelection {
                date: "2020-01-01".into(),
                event: "A vs B".into(),
                market: "1X2".into(),
                pick: "1".into(),
                status: "Won".into(),
            }],
            stakes: BetSlipStakes {
                bet_type: "Single".into(),
                no_of_bets: "1".into(),
                unit_stake: "5,00".into(),
                stake: "5,00".into(),
                bonus: "0,00".into(),
                potential_winnings: "9,50".into(),
                winnings: "9,50".into(),
                status: "Won".into(),
                note: "".into(),
            },
        };

        let text = serde_json::to_string_pretty(&slip).unwrap();
        let back: BetSlipRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(
            serde_json::to_value(&slip).unwrap(),
            serde_json::to_value(&back).unwrap()
        );
    }
}
