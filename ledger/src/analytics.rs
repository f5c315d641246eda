//! Lifecycle analytics.
//!
//! Read-only views derived on demand from the audit log (and, for current
//! snapshots, the catalog). Every scan is O(matching entries); nothing here
//! maintains incremental state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde::Serialize;

use crib_store::{DateRange, EntryFilter, EntryKind, LedgerStore, ToolRecord};

use crate::error::LedgerResult;

/// Per-tool tally used by the consumption and scrap rankings. Consumption
/// sums issued quantities; scrap counts retirement events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolTally {
    pub tool_name: String,
    pub quantity: u32,
}

/// "Top consumed" and "top scrapped" tool rankings for a date window.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumptionReport {
    pub top_consumed: Vec<ToolTally>,
    pub top_scrapped: Vec<ToolTally>,
}

/// Per-operator take/scrap record for a date window.
///
/// Wear returns are tracked but excluded from the error rate; only
/// damage (and legacy undifferentiated scrap) counts against the operator.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorScorecard {
    pub receiver: String,
    pub total_taken: u32,
    pub scrap_attributable: u32,
    pub wear_returns: u32,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Worsening,
    Flat,
    /// The prior year has no log entries for the tool, so there is nothing
    /// to compare against.
    InsufficientData,
}

/// Stock added and scrap events in one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyActivity {
    /// 1-based calendar month.
    pub month: u32,
    pub stock_added: u32,
    pub scrapped: u32,
}

/// Year-over-year lifecycle view for one tool type.
#[derive(Debug, Clone, Serialize)]
pub struct ToolLifecycle {
    pub tool_name: String,
    pub year: i32,
    /// Twelve buckets, January through December of `year`.
    pub monthly: Vec<MonthlyActivity>,
    pub scrap_this_year: u32,
    pub scrap_prior_year: u32,
    pub trend: TrendDirection,
}

/// Read-only aggregation layer over the audit log.
#[derive(Clone)]
pub struct Analytics {
    store: Arc<dyn LedgerStore>,
}

impl Analytics {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Tools at or below their alert threshold, lowest stock first.
    pub async fn critical_stock(&self) -> LedgerResult<Vec<ToolRecord>> {
        let mut tools: Vec<ToolRecord> = self
            .store
            .list_tools()
            .await?
            .into_iter()
            .filter(ToolRecord::is_critical)
            .collect();
        tools.sort_by(|a, b| a.total_stock.cmp(&b.total_stock).then(a.name.cmp(&b.name)));
        Ok(tools)
    }

    /// Rank tools by issued quantity and by scrap events inside the window.
    pub async fn consumption_ranking(
        &self,
        range: DateRange,
        top_n: usize,
    ) -> LedgerResult<ConsumptionReport> {
        let entries = self.store.entries(EntryFilter::all().within(range)).await?;

        let mut consumed: HashMap<String, u32> = HashMap::new();
        let mut scrapped: HashMap<String, u32> = HashMap::new();
        for entry in &entries {
            match entry.kind {
                EntryKind::Issue => {
                    *consumed.entry(entry.tool_name.clone()).or_default() += entry.quantity;
                }
                EntryKind::ReturnScrapDamage
                | EntryKind::ReturnScrapWear
                | EntryKind::ReturnScrap => {
                    // Scrap is tallied per event; units retire one at a time.
                    *scrapped.entry(entry.tool_name.clone()).or_default() += 1;
                }
                EntryKind::Transfer | EntryKind::ReturnHealthy | EntryKind::StockEntry => {}
            }
        }

        Ok(ConsumptionReport {
            top_consumed: rank(consumed, top_n),
            top_scrapped: rank(scrapped, top_n),
        })
    }

    /// Per-receiver scorecards for the window, worst error rate first.
    pub async fn operator_scorecards(
        &self,
        range: DateRange,
    ) -> LedgerResult<Vec<OperatorScorecard>> {
        let entries = self.store.entries(EntryFilter::all().within(range)).await?;

        #[derive(Default)]
        struct Tally {
            taken: u32,
            scrap: u32,
            wear: u32,
        }

        let mut by_receiver: HashMap<String, Tally> = HashMap::new();
        for entry in &entries {
            let tally = by_receiver.entry(entry.receiver.clone()).or_default();
            match entry.kind {
                EntryKind::Issue => tally.taken += entry.quantity,
                EntryKind::ReturnScrapDamage | EntryKind::ReturnScrap => tally.scrap += 1,
                EntryKind::ReturnScrapWear => tally.wear += 1,
                EntryKind::Transfer | EntryKind::ReturnHealthy | EntryKind::StockEntry => {}
            }
        }

        let mut cards: Vec<OperatorScorecard> = by_receiver
            .into_iter()
            .map(|(receiver, tally)| OperatorScorecard {
                receiver,
                total_taken: tally.taken,
                scrap_attributable: tally.scrap,
                wear_returns: tally.wear,
                error_rate: if tally.taken == 0 {
                    0.0
                } else {
                    f64::from(tally.scrap) / f64::from(tally.taken)
                },
            })
            .collect();
        cards.sort_by(|a, b| {
            b.error_rate
                .partial_cmp(&a.error_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.receiver.cmp(&b.receiver))
        });
        Ok(cards)
    }

    /// Monthly stock-in/scrap buckets for `year` plus the year-over-year
    /// scrap trend for one tool.
    pub async fn tool_lifecycle(&self, tool_name: &str, year: i32) -> LedgerResult<ToolLifecycle> {
        let entries = self.store.entries(EntryFilter::all().tool(tool_name)).await?;

        let mut monthly: Vec<MonthlyActivity> = (1..=12)
            .map(|month| MonthlyActivity {
                month,
                stock_added: 0,
                scrapped: 0,
            })
            .collect();
        let mut scrap_this_year = 0u32;
        let mut scrap_prior_year = 0u32;
        let mut prior_year_seen = false;

        for entry in &entries {
            let entry_year = entry.date.year();
            if entry_year == year - 1 {
                prior_year_seen = true;
            }
            match entry.kind {
                EntryKind::StockEntry => {
                    if entry_year == year {
                        monthly[entry.date.month0() as usize].stock_added += entry.quantity;
                    }
                }
                EntryKind::ReturnScrapDamage
                | EntryKind::ReturnScrapWear
                | EntryKind::ReturnScrap => {
                    if entry_year == year {
                        monthly[entry.date.month0() as usize].scrapped += 1;
                        scrap_this_year += 1;
                    } else if entry_year == year - 1 {
                        scrap_prior_year += 1;
                    }
                }
                EntryKind::Issue | EntryKind::Transfer | EntryKind::ReturnHealthy => {}
            }
        }

        let trend = if !prior_year_seen {
            TrendDirection::InsufficientData
        } else if scrap_this_year < scrap_prior_year {
            TrendDirection::Improving
        } else if scrap_this_year > scrap_prior_year {
            TrendDirection::Worsening
        } else {
            TrendDirection::Flat
        };

        Ok(ToolLifecycle {
            tool_name: tool_name.to_string(),
            year,
            monthly,
            scrap_this_year,
            scrap_prior_year,
            trend,
        })
    }

    /// [`Self::tool_lifecycle`] for the calendar year of the current date.
    pub async fn tool_lifecycle_current_year(&self, tool_name: &str) -> LedgerResult<ToolLifecycle> {
        self.tool_lifecycle(tool_name, Utc::now().year()).await
    }
}

fn rank(tallies: HashMap<String, u32>, top_n: usize) -> Vec<ToolTally> {
    let mut ranked: Vec<ToolTally> = tallies
        .into_iter()
        .map(|(tool_name, quantity)| ToolTally {
            tool_name,
            quantity,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.quantity
            .cmp(&a.quantity)
            .then_with(|| a.tool_name.cmp(&b.tool_name))
    });
    ranked.truncate(top_n);
    ranked
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use crib_store::{CommitBatch, LedgerEntry, MemoryLedgerStore};

    use super::*;

    fn at(year: i32, month: u32, day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0)
            .single()
            .expect("valid test timestamp")
    }

    async fn analytics_over(entries: Vec<LedgerEntry>) -> Analytics {
        let store = Arc::new(MemoryLedgerStore::new());
        let mut batch = CommitBatch::new();
        for entry in entries {
            batch.push_entry(entry);
        }
        store.commit(batch).await.expect("seed entries");
        Analytics::new(store)
    }

    #[tokio::test]
    async fn critical_stock_is_inclusive_and_sorted_ascending() {
        let store = Arc::new(MemoryLedgerStore::new());
        store
            .put_tool(ToolRecord::new("Low", "drill", 2, 5))
            .await
            .expect("seed");
        store
            .put_tool(ToolRecord::new("At Threshold", "drill", 5, 5))
            .await
            .expect("seed");
        store
            .put_tool(ToolRecord::new("Healthy", "drill", 6, 5))
            .await
            .expect("seed");

        let critical = Analytics::new(store)
            .critical_stock()
            .await
            .expect("critical stock query");
        let names: Vec<&str> = critical.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Low", "At Threshold"],
            "inclusive threshold, ascending by stock"
        );
    }

    #[tokio::test]
    async fn consumption_ranking_tallies_issues_and_scrap() {
        let analytics = analytics_over(vec![
            LedgerEntry::new(EntryKind::Issue, "Drill", 3, "depot", "Ali").with_date(at(2025, 3, 1)),
            LedgerEntry::new(EntryKind::Issue, "Drill", 2, "depot", "Veli")
                .with_date(at(2025, 4, 1)),
            LedgerEntry::new(EntryKind::Issue, "Insert", 4, "depot", "Ali")
                .with_date(at(2025, 5, 1)),
            LedgerEntry::new(EntryKind::ReturnScrapDamage, "Insert", 1, "depot", "Ali")
                .with_date(at(2025, 5, 2)),
            LedgerEntry::new(EntryKind::ReturnScrapWear, "Insert", 1, "depot", "Veli")
                .with_date(at(2025, 5, 3)),
            // Healthy returns and stock entries must not count as consumption.
            LedgerEntry::new(EntryKind::ReturnHealthy, "Drill", 1, "depot", "Ali")
                .with_date(at(2025, 6, 1)),
            LedgerEntry::new(EntryKind::StockEntry, "Drill", 50, "depot", "depot")
                .with_date(at(2025, 6, 2)),
            // Outside the window.
            LedgerEntry::new(EntryKind::Issue, "Drill", 99, "depot", "Ali")
                .with_date(at(2024, 1, 1)),
        ])
        .await;

        let report = analytics
            .consumption_ranking(DateRange::year(2025), 10)
            .await
            .expect("ranking");

        assert_eq!(
            report.top_consumed,
            vec![
                ToolTally {
                    tool_name: "Drill".to_string(),
                    quantity: 5
                },
                ToolTally {
                    tool_name: "Insert".to_string(),
                    quantity: 4
                },
            ]
        );
        assert_eq!(report.top_scrapped.len(), 1);
        assert_eq!(report.top_scrapped[0].tool_name, "Insert");
        assert_eq!(report.top_scrapped[0].quantity, 2);
    }

    #[tokio::test]
    async fn consumption_ranking_truncates_to_top_n() {
        let analytics = analytics_over(vec![
            LedgerEntry::new(EntryKind::Issue, "A", 1, "depot", "Ali").with_date(at(2025, 1, 1)),
            LedgerEntry::new(EntryKind::Issue, "B", 2, "depot", "Ali").with_date(at(2025, 1, 2)),
            LedgerEntry::new(EntryKind::Issue, "C", 3, "depot", "Ali").with_date(at(2025, 1, 3)),
        ])
        .await;

        let report = analytics
            .consumption_ranking(DateRange::year(2025), 2)
            .await
            .expect("ranking");
        let names: Vec<&str> = report
            .top_consumed
            .iter()
            .map(|t| t.tool_name.as_str())
            .collect();
        assert_eq!(names, vec!["C", "B"]);
    }

    #[tokio::test]
    async fn scorecards_split_damage_from_wear() {
        let analytics = analytics_over(vec![
            LedgerEntry::new(EntryKind::Issue, "Drill", 3, "depot", "Ali").with_date(at(2025, 2, 1)),
            LedgerEntry::new(EntryKind::ReturnScrapDamage, "Drill", 1, "depot", "Ali")
                .with_date(at(2025, 2, 10)),
            LedgerEntry::new(EntryKind::ReturnScrapWear, "Drill", 1, "depot", "Ali")
                .with_date(at(2025, 2, 11)),
            LedgerEntry::new(EntryKind::Issue, "Drill", 4, "depot", "Veli")
                .with_date(at(2025, 2, 12)),
        ])
        .await;

        let cards = analytics
            .operator_scorecards(DateRange::year(2025))
            .await
            .expect("scorecards");
        assert_eq!(cards.len(), 2);

        let ali = &cards[0];
        assert_eq!(ali.receiver, "Ali", "worst error rate sorts first");
        assert_eq!(ali.total_taken, 3);
        assert_eq!(ali.scrap_attributable, 1);
        assert_eq!(ali.wear_returns, 1, "wear is tracked separately");
        assert!(
            (ali.error_rate - 1.0 / 3.0).abs() < f64::EPSILON,
            "damage only: 1/3, got {}",
            ali.error_rate
        );

        let veli = &cards[1];
        assert_eq!(veli.total_taken, 4);
        assert_eq!(veli.error_rate, 0.0);
    }

    #[tokio::test]
    async fn scorecards_count_legacy_scrap_as_attributable() {
        let analytics = analytics_over(vec![
            LedgerEntry::new(EntryKind::Issue, "Drill", 2, "depot", "Ali").with_date(at(2025, 2, 1)),
            LedgerEntry::new(EntryKind::ReturnScrap, "Drill", 1, "depot", "Ali")
                .with_date(at(2025, 2, 5)),
        ])
        .await;

        let cards = analytics
            .operator_scorecards(DateRange::year(2025))
            .await
            .expect("scorecards");
        assert_eq!(cards[0].scrap_attributable, 1);
        assert!((cards[0].error_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn scorecard_error_rate_is_zero_when_nothing_taken() {
        let analytics = analytics_over(vec![LedgerEntry::new(
            EntryKind::ReturnScrapDamage,
            "Drill",
            1,
            "depot",
            "Ali",
        )
        .with_date(at(2025, 2, 5))])
        .await;

        let cards = analytics
            .operator_scorecards(DateRange::year(2025))
            .await
            .expect("scorecards");
        assert_eq!(cards[0].total_taken, 0);
        assert_eq!(cards[0].error_rate, 0.0, "no division by zero");
    }

    #[tokio::test]
    async fn lifecycle_buckets_by_month_and_compares_years() {
        let analytics = analytics_over(vec![
            LedgerEntry::new(EntryKind::StockEntry, "Drill", 20, "depot", "depot")
                .with_date(at(2025, 1, 5)),
            LedgerEntry::new(EntryKind::ReturnScrapDamage, "Drill", 1, "depot", "Ali")
                .with_date(at(2025, 3, 8)),
            LedgerEntry::new(EntryKind::ReturnScrapWear, "Drill", 1, "depot", "Ali")
                .with_date(at(2025, 3, 9)),
            // Prior year: three scrap events.
            LedgerEntry::new(EntryKind::ReturnScrap, "Drill", 1, "depot", "Ali")
                .with_date(at(2024, 7, 1)),
            LedgerEntry::new(EntryKind::ReturnScrapDamage, "Drill", 1, "depot", "Ali")
                .with_date(at(2024, 8, 1)),
            LedgerEntry::new(EntryKind::ReturnScrapWear, "Drill", 1, "depot", "Ali")
                .with_date(at(2024, 9, 1)),
            // Other tools never leak into the view.
            LedgerEntry::new(EntryKind::StockEntry, "Insert", 9, "depot", "depot")
                .with_date(at(2025, 1, 6)),
        ])
        .await;

        let lifecycle = analytics
            .tool_lifecycle("Drill", 2025)
            .await
            .expect("lifecycle");
        assert_eq!(lifecycle.monthly.len(), 12);
        assert_eq!(lifecycle.monthly[0].stock_added, 20, "January stock entry");
        assert_eq!(lifecycle.monthly[2].scrapped, 2, "March scrap events");
        assert_eq!(lifecycle.scrap_this_year, 2);
        assert_eq!(lifecycle.scrap_prior_year, 3);
        assert_eq!(lifecycle.trend, TrendDirection::Improving);
    }

    #[tokio::test]
    async fn lifecycle_trend_worsening_and_flat() {
        let worsening = analytics_over(vec![
            LedgerEntry::new(EntryKind::ReturnScrapDamage, "Drill", 1, "depot", "Ali")
                .with_date(at(2024, 5, 1)),
            LedgerEntry::new(EntryKind::ReturnScrapDamage, "Drill", 1, "depot", "Ali")
                .with_date(at(2025, 5, 1)),
            LedgerEntry::new(EntryKind::ReturnScrapDamage, "Drill", 1, "depot", "Ali")
                .with_date(at(2025, 6, 1)),
        ])
        .await;
        let view = worsening
            .tool_lifecycle("Drill", 2025)
            .await
            .expect("lifecycle");
        assert_eq!(view.trend, TrendDirection::Worsening);

        let flat = analytics_over(vec![
            LedgerEntry::new(EntryKind::ReturnScrapDamage, "Drill", 1, "depot", "Ali")
                .with_date(at(2024, 5, 1)),
            LedgerEntry::new(EntryKind::ReturnScrapDamage, "Drill", 1, "depot", "Ali")
                .with_date(at(2025, 5, 1)),
        ])
        .await;
        let view = flat.tool_lifecycle("Drill", 2025).await.expect("lifecycle");
        assert_eq!(view.trend, TrendDirection::Flat);
    }

    #[tokio::test]
    async fn lifecycle_without_prior_year_data_is_insufficient() {
        let analytics = analytics_over(vec![LedgerEntry::new(
            EntryKind::ReturnScrapDamage,
            "Drill",
            1,
            "depot",
            "Ali",
        )
        .with_date(at(2025, 5, 1))])
        .await;

        let view = analytics
            .tool_lifecycle("Drill", 2025)
            .await
            .expect("lifecycle");
        assert_eq!(view.trend, TrendDirection::InsufficientData);
    }

    #[tokio::test]
    async fn lifecycle_prior_year_activity_of_any_kind_enables_comparison() {
        // An issue in the prior year is enough history to call zero scrap a
        // real zero rather than missing data.
        let analytics = analytics_over(vec![
            LedgerEntry::new(EntryKind::Issue, "Drill", 2, "depot", "Ali")
                .with_date(at(2024, 5, 1)),
            LedgerEntry::new(EntryKind::ReturnScrapDamage, "Drill", 1, "depot", "Ali")
                .with_date(at(2025, 5, 1)),
        ])
        .await;

        let view = analytics
            .tool_lifecycle("Drill", 2025)
            .await
            .expect("lifecycle");
        assert_eq!(view.scrap_prior_year, 0);
        assert_eq!(view.trend, TrendDirection::Worsening);
    }
}
