//! RFM engine: per-customer aggregation, quintile scoring and segment labels

use crate::config::BinningPolicy;
use crate::data::Transaction;
use crate::error::Error;
use crate::segment::{classify, rf_key, Segment};
use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;
use tracing::{info, warn};

/// Number of quantile buckets per metric
pub const BUCKETS: usize = 5;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Column order of the RFM table
pub const RFM_COLUMNS: [&str; 9] = [
    "customer_id",
    "recency",
    "frequency",
    "monetary",
    "r_score",
    "f_score",
    "m_score",
    "rf_score",
    "segment",
];

/// Scores and segment for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRfm {
    pub customer_id: String,
    /// Whole days between the snapshot and the last purchase, at least 1
    pub recency: i64,
    /// Distinct invoices
    pub frequency: i64,
    pub monetary: f64,
    pub r_score: u8,
    pub f_score: u8,
    pub m_score: u8,
    pub rf_score: String,
    pub segment: Segment,
}

/// Per-customer RFM table, ordered by customer id
#[derive(Debug, Clone)]
pub struct RfmTable {
    pub snapshot_date: NaiveDateTime,
    pub customers: Vec<CustomerRfm>,
}

impl RfmTable {
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn get(&self, customer_id: &str) -> Option<&CustomerRfm> {
        self.customers
            .binary_search_by(|c| c.customer_id.as_str().cmp(customer_id))
            .ok()
            .map(|idx| &self.customers[idx])
    }

    pub fn to_dataframe(&self) -> crate::Result<DataFrame> {
        let c = &self.customers;
        let df = df!(
            "customer_id" => c.iter().map(|r| r.customer_id.as_str()).collect::<Vec<_>>(),
            "recency" => c.iter().map(|r| r.recency).collect::<Vec<_>>(),
            "frequency" => c.iter().map(|r| r.frequency).collect::<Vec<_>>(),
            "monetary" => c.iter().map(|r| r.monetary).collect::<Vec<_>>(),
            "r_score" => c.iter().map(|r| r.r_score as i32).collect::<Vec<_>>(),
            "f_score" => c.iter().map(|r| r.f_score as i32).collect::<Vec<_>>(),
            "m_score" => c.iter().map(|r| r.m_score as i32).collect::<Vec<_>>(),
            "rf_score" => c.iter().map(|r| r.rf_score.as_str()).collect::<Vec<_>>(),
            "segment" => c.iter().map(|r| r.segment.label()).collect::<Vec<_>>(),
        )?;
        Ok(df)
    }

    pub fn write_csv(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
        info!(path = %path.display(), customers = self.len(), "saved RFM table");
        Ok(())
    }
}

/// Latest invoice timestamp plus one day, so the most recent buyer has recency 1
pub fn snapshot_date(transactions: &[Transaction]) -> crate::Result<NaiveDateTime> {
    transactions
        .iter()
        .map(|t| t.invoice_date)
        .max()
        .map(|latest| latest + Duration::days(1))
        .ok_or(Error::EmptyInput)
}

/// Value ranks 1..=n with ties broken by position
pub fn ordinal_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        ranks[idx] = (rank + 1) as f64;
    }
    ranks
}

fn distinct_count(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}

/// Quantile edges at 0, 1/5, ..., 5/5 with linear interpolation between
/// order statistics.
fn quantile_edges(sorted: &[f64]) -> [f64; BUCKETS + 1] {
    let n = sorted.len();
    let mut edges = [0.0; BUCKETS + 1];
    for (i, edge) in edges.iter_mut().enumerate() {
        // position i * (n - 1) / BUCKETS, split into whole and fractional part
        let scaled = i * (n - 1);
        let lo = scaled / BUCKETS;
        let rem = scaled % BUCKETS;
        *edge = if rem == 0 {
            sorted[lo]
        } else {
            sorted[lo] + (sorted[lo + 1] - sorted[lo]) * rem as f64 / BUCKETS as f64
        };
    }
    edges
}

/// Assign each value to one of five equal-population buckets (0 = lowest).
///
/// Buckets are right-closed and the first one also holds the minimum. When two
/// adjacent edges coincide the buckets would not be well defined, so the
/// metric is reported as `DegenerateDistribution` instead of being coerced.
pub fn quantile_bins(values: &[f64], metric: &'static str) -> crate::Result<Vec<usize>> {
    if values.is_empty() {
        return Err(Error::EmptyInput);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(Error::NonFinite { metric });
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let edges = quantile_edges(&sorted);

    if edges.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::DegenerateDistribution {
            metric,
            distinct: distinct_count(values),
        });
    }

    values
        .iter()
        .map(|&v| {
            edges[1..]
                .iter()
                .position(|&upper| v <= upper)
                .ok_or(Error::NonFinite { metric })
        })
        .collect()
}

fn bins_with_policy(
    values: &[f64],
    metric: &'static str,
    policy: BinningPolicy,
) -> crate::Result<Vec<usize>> {
    match quantile_bins(values, metric) {
        Err(Error::DegenerateDistribution { distinct, .. }) if policy == BinningPolicy::RankFallback => {
            warn!(metric, distinct, "too many ties for quintiles, binning by rank");
            quantile_bins(&ordinal_ranks(values), metric)
        }
        other => other,
    }
}

/// Scores where the lowest bucket is best (recency)
fn descending_scores(bins: &[usize]) -> Vec<u8> {
    bins.iter().map(|&b| (BUCKETS - b) as u8).collect()
}

fn ascending_scores(bins: &[usize]) -> Vec<u8> {
    bins.iter().map(|&b| (b + 1) as u8).collect()
}

/// Per-customer last purchase, distinct invoices and spend, ordered by customer id
fn aggregate_customers(transactions: &[Transaction], snapshot: NaiveDateTime) -> crate::Result<DataFrame> {
    let snapshot_ms = snapshot.and_utc().timestamp_millis();

    let df = df!(
        "customer_id" => transactions.iter().map(|t| t.customer_id.as_str()).collect::<Vec<_>>(),
        "invoice" => transactions.iter().map(|t| t.invoice.as_str()).collect::<Vec<_>>(),
        "invoice_ts" => transactions
            .iter()
            .map(|t| t.invoice_date.and_utc().timestamp_millis())
            .collect::<Vec<_>>(),
        "total_amount" => transactions.iter().map(|t| t.total_amount).collect::<Vec<_>>(),
    )?;

    let rfm_df = df
        .lazy()
        .group_by([col("customer_id")])
        .agg([
            col("invoice_ts").max().alias("last_purchase"),
            // distinct invoices, not line items
            col("invoice").n_unique().cast(DataType::Int64).alias("frequency"),
            col("total_amount").sum().alias("monetary"),
        ])
        .with_columns([
            // whole days, the snapshot is always after the last purchase
            (lit(snapshot_ms) - col("last_purchase"))
                .floor_div(lit(MILLIS_PER_DAY))
                .cast(DataType::Int64)
                .alias("recency"),
        ])
        .select([
            col("customer_id"),
            col("recency"),
            col("frequency"),
            col("monetary"),
        ])
        .sort(["customer_id"], SortMultipleOptions::default())
        .collect()?;

    Ok(rfm_df)
}

/// Compute the RFM table from the canonical transaction table
pub fn compute_rfm(transactions: &[Transaction], policy: BinningPolicy) -> crate::Result<RfmTable> {
    let snapshot = snapshot_date(transactions)?;
    let rfm_df = aggregate_customers(transactions, snapshot)?;

    let ids: Vec<String> = rfm_df
        .column("customer_id")?
        .str()?
        .into_no_null_iter()
        .map(str::to_string)
        .collect();
    let recency: Vec<i64> = rfm_df.column("recency")?.i64()?.into_no_null_iter().collect();
    let frequency: Vec<i64> = rfm_df.column("frequency")?.i64()?.into_no_null_iter().collect();
    let monetary: Vec<f64> = rfm_df.column("monetary")?.f64()?.into_no_null_iter().collect();

    let recency_values: Vec<f64> = recency.iter().map(|&r| r as f64).collect();
    let frequency_ranks = ordinal_ranks(&frequency.iter().map(|&f| f as f64).collect::<Vec<_>>());

    let r_scores = descending_scores(&bins_with_policy(&recency_values, "recency", policy)?);
    let f_scores = ascending_scores(&quantile_bins(&frequency_ranks, "frequency")?);
    let m_scores = ascending_scores(&bins_with_policy(&monetary, "monetary", policy)?);

    let customers: Vec<CustomerRfm> = ids
        .into_iter()
        .enumerate()
        .map(|(i, customer_id)| CustomerRfm {
            customer_id,
            recency: recency[i],
            frequency: frequency[i],
            monetary: monetary[i],
            r_score: r_scores[i],
            f_score: f_scores[i],
            m_score: m_scores[i],
            rf_score: rf_key(r_scores[i], f_scores[i]),
            segment: classify(r_scores[i], f_scores[i]),
        })
        .collect();

    info!(
        customers = customers.len(),
        snapshot = %snapshot,
        "computed RFM scores"
    );

    Ok(RfmTable {
        snapshot_date: snapshot,
        customers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 1, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn txn(invoice: &str, customer: &str, date: NaiveDateTime, amount: f64) -> Transaction {
        Transaction {
            invoice: invoice.to_string(),
            stock_code: None,
            description: None,
            quantity: 1,
            invoice_date: date,
            price: amount,
            customer_id: customer.to_string(),
            country: None,
            total_amount: amount,
            is_cancellation: false,
        }
    }

    /// Three customers: day 1 / 1 invoice / 10, day 5 / 2 invoices / 50,
    /// day 10 / 5 invoices / 500.
    fn three_customers() -> Vec<Transaction> {
        let mut t = vec![
            txn("100", "A", day(1), 10.0),
            txn("200", "B", day(3), 20.0),
            txn("201", "B", day(5), 30.0),
        ];
        for (i, d) in [2, 4, 6, 8, 10].into_iter().enumerate() {
            t.push(txn(&format!("30{i}"), "C", day(d), 100.0));
        }
        t
    }

    #[test]
    fn test_three_customer_scenario() {
        let table = compute_rfm(&three_customers(), BinningPolicy::Strict).unwrap();

        assert_eq!(table.snapshot_date, day(11));
        assert_eq!(table.len(), 3);

        let a = table.get("A").unwrap();
        let b = table.get("B").unwrap();
        let c = table.get("C").unwrap();
        assert_eq!((a.recency, b.recency, c.recency), (10, 6, 1));
        assert_eq!((a.frequency, b.frequency, c.frequency), (1, 2, 5));
        assert_eq!((a.monetary, b.monetary, c.monetary), (10.0, 50.0, 500.0));

        assert_eq!((c.r_score, c.f_score, c.m_score), (5, 5, 5));
        assert_eq!(c.rf_score, "55");
        assert_eq!(c.segment, Segment::Champions);
        assert_eq!((a.r_score, a.f_score, a.m_score), (1, 1, 1));
        assert_eq!(a.segment, Segment::Hibernating);
        assert_eq!(b.segment, Segment::NeedAttention);
    }

    #[test]
    fn test_frequency_counts_distinct_invoices() {
        let mut t = three_customers();
        // second line item on an existing invoice
        t.push(txn("100", "A", day(1), 5.0));
        let table = compute_rfm(&t, BinningPolicy::Strict).unwrap();

        let a = table.get("A").unwrap();
        assert_eq!(a.frequency, 1);
        assert_eq!(a.monetary, 15.0);
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            compute_rfm(&[], BinningPolicy::Strict),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn test_quantile_bins_equal_population() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let bins = quantile_bins(&values, "m").unwrap();
        assert_eq!(bins, vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn test_quantile_bins_degenerate() {
        let values = [1.0, 1.0, 1.0, 1.0, 2.0, 3.0];
        let err = quantile_bins(&values, "recency").unwrap_err();
        assert!(matches!(
            err,
            Error::DegenerateDistribution { metric: "recency", distinct: 3 }
        ));
    }

    #[test]
    fn test_ordinal_ranks_break_ties_by_position() {
        assert_eq!(
            ordinal_ranks(&[3.0, 1.0, 3.0, 2.0]),
            vec![3.0, 1.0, 4.0, 2.0]
        );
    }

    #[test]
    fn test_rank_fallback_for_tied_monetary() {
        let mut t = Vec::new();
        for (i, d) in (1..=6).enumerate() {
            // identical spend for every customer
            t.push(txn(&format!("{i}"), &format!("C{i}"), day(d), 10.0));
        }

        let strict = compute_rfm(&t, BinningPolicy::Strict);
        assert!(matches!(
            strict,
            Err(Error::DegenerateDistribution { metric: "monetary", distinct: 1 })
        ));

        let table = compute_rfm(&t, BinningPolicy::RankFallback).unwrap();
        assert_eq!(table.len(), 6);
        assert!(table.customers.iter().all(|c| (1..=5).contains(&c.m_score)));
    }

    #[test]
    fn test_tied_recency_policies() {
        // six customers whose last purchase falls on the same day
        let t: Vec<Transaction> = (1..=6)
            .map(|i| txn(&format!("{i}"), &format!("C{i}"), day(7), 10.0 * f64::from(i)))
            .collect();

        assert!(matches!(
            compute_rfm(&t, BinningPolicy::Strict),
            Err(Error::DegenerateDistribution { metric: "recency", distinct: 1 })
        ));

        let table = compute_rfm(&t, BinningPolicy::RankFallback).unwrap();
        assert_eq!(table.len(), 6);
        for c in &table.customers {
            assert_eq!(c.recency, 1);
            assert!((1..=5).contains(&c.r_score));
        }
        // monetary was not tied, so it keeps its quintiles
        assert_eq!(table.get("C6").unwrap().m_score, 5);
        assert_eq!(table.get("C1").unwrap().m_score, 1);
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        let values = [1.0, 2.0, f64::NAN, 4.0, 5.0, 6.0];
        assert!(matches!(
            quantile_bins(&values, "monetary"),
            Err(Error::NonFinite { metric: "monetary" })
        ));
        assert!(matches!(
            quantile_bins(&[1.0, 2.0, 3.0, 4.0, 5.0, f64::INFINITY], "monetary"),
            Err(Error::NonFinite { .. })
        ));
    }

    #[test]
    fn test_recency_counts_whole_days() {
        let late = NaiveDate::from_ymd_opt(2011, 1, 10)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        let t = vec![
            txn("1", "A", day(10), 10.0),
            txn("2", "B", late, 20.0),
        ];
        let snapshot = snapshot_date(&t).unwrap();
        let rfm_df = aggregate_customers(&t, snapshot).unwrap();

        let ids: Vec<&str> = rfm_df.column("customer_id").unwrap().str().unwrap().into_no_null_iter().collect();
        let recency: Vec<i64> = rfm_df.column("recency").unwrap().i64().unwrap().into_no_null_iter().collect();
        assert_eq!(ids, vec!["A", "B"]);
        // A is 35 hours before the snapshot
        assert_eq!(recency, vec![1, 1]);
    }

    #[test]
    fn test_single_customer_is_degenerate() {
        let t = vec![txn("1", "A", day(1), 10.0)];
        assert!(matches!(
            compute_rfm(&t, BinningPolicy::RankFallback),
            Err(Error::DegenerateDistribution { .. })
        ));
    }

    #[test]
    fn test_to_dataframe_columns() {
        let table = compute_rfm(&three_customers(), BinningPolicy::Strict).unwrap();
        let df = table.to_dataframe().unwrap();

        assert_eq!(df.height(), 3);
        assert_eq!(df.get_column_names(), RFM_COLUMNS.to_vec());
    }
}
