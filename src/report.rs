//! Aggregates behind the dashboard views: seasonality and segment summaries

use crate::data::Transaction;
use crate::model::{CustomerRfm, RfmTable};
use crate::segment::Segment;
use chrono::{Datelike, NaiveDate, Timelike, Weekday};
use std::collections::{BTreeMap, BTreeSet};

/// Weekdays in display order
pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Revenue for one calendar month
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyRevenue {
    /// First day of the month
    pub month: NaiveDate,
    pub revenue: f64,
}

/// Revenue trends for a (possibly year-filtered) transaction table
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalitySummary {
    pub total_revenue: f64,
    /// Line items, not invoices
    pub transaction_count: usize,
    pub monthly: Vec<MonthlyRevenue>,
    pub best_month: Option<MonthlyRevenue>,
    pub by_weekday: Vec<(Weekday, f64)>,
    /// Only hours that saw sales
    pub by_hour: Vec<(u32, f64)>,
}

/// Customer count and revenue per segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub customers: usize,
    pub revenue: f64,
}

/// Distinct invoice years, ascending
pub fn available_years(transactions: &[Transaction]) -> Vec<i32> {
    transactions
        .iter()
        .map(Transaction::year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Keep transactions from the selected years; an empty selection keeps all
pub fn filter_years(transactions: &[Transaction], years: &[i32]) -> Vec<Transaction> {
    transactions
        .iter()
        .filter(|t| years.is_empty() || years.contains(&t.year()))
        .cloned()
        .collect()
}

pub fn seasonality(transactions: &[Transaction]) -> SeasonalitySummary {
    let mut monthly: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    let mut weekday = [0.0; 7];
    let mut hourly: BTreeMap<u32, f64> = BTreeMap::new();

    for t in transactions {
        let date = t.invoice_date.date();
        if let Some(month) = date.with_day(1) {
            *monthly.entry(month).or_default() += t.total_amount;
        }
        weekday[date.weekday().num_days_from_monday() as usize] += t.total_amount;
        *hourly.entry(t.invoice_date.hour()).or_default() += t.total_amount;
    }

    let monthly: Vec<MonthlyRevenue> = monthly
        .into_iter()
        .map(|(month, revenue)| MonthlyRevenue { month, revenue })
        .collect();

    // first month wins on ties
    let best_month = monthly
        .iter()
        .fold(None::<&MonthlyRevenue>, |best, m| match best {
            Some(b) if b.revenue >= m.revenue => Some(b),
            _ => Some(m),
        })
        .cloned();

    SeasonalitySummary {
        total_revenue: transactions.iter().map(|t| t.total_amount).sum(),
        transaction_count: transactions.len(),
        monthly,
        best_month,
        by_weekday: WEEKDAYS.iter().copied().zip(weekday).collect(),
        by_hour: hourly.into_iter().collect(),
    }
}

/// Segments ordered by customer count (largest first), then segment order
pub fn segment_summary(table: &RfmTable) -> Vec<SegmentSummary> {
    let mut totals: BTreeMap<Segment, (usize, f64)> = BTreeMap::new();
    for c in &table.customers {
        let entry = totals.entry(c.segment).or_default();
        entry.0 += 1;
        entry.1 += c.monetary;
    }

    let mut summary: Vec<SegmentSummary> = totals
        .into_iter()
        .map(|(segment, (customers, revenue))| SegmentSummary {
            segment,
            customers,
            revenue,
        })
        .collect();
    summary.sort_by(|a, b| b.customers.cmp(&a.customers).then(a.segment.cmp(&b.segment)));
    summary
}

/// Highest-spending customers of one segment
pub fn top_customers(table: &RfmTable, segment: Segment, limit: usize) -> Vec<&CustomerRfm> {
    let mut members: Vec<&CustomerRfm> = table
        .customers
        .iter()
        .filter(|c| c.segment == segment)
        .collect();
    members.sort_by(|a, b| b.monetary.total_cmp(&a.monetary));
    members.truncate(limit);
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn txn(customer: &str, date: NaiveDateTime, amount: f64) -> Transaction {
        Transaction {
            invoice: format!("{customer}-{date}"),
            stock_code: None,
            description: None,
            quantity: 2,
            invoice_date: date,
            price: amount / 2.0,
            customer_id: customer.to_string(),
            country: None,
            total_amount: amount,
            is_cancellation: false,
        }
    }

    fn sample() -> Vec<Transaction> {
        vec![
            // Tuesday
            txn("A", at(2010, 12, 7, 9), 10.0),
            // Friday
            txn("B", at(2010, 12, 10, 14), 30.0),
            // Saturday
            txn("A", at(2011, 1, 1, 9), 25.0),
        ]
    }

    #[test]
    fn test_years() {
        let t = sample();
        assert_eq!(available_years(&t), vec![2010, 2011]);
        assert_eq!(filter_years(&t, &[2011]).len(), 1);
        assert_eq!(filter_years(&t, &[]).len(), 3);
    }

    #[test]
    fn test_seasonality() {
        let summary = seasonality(&sample());

        assert_eq!(summary.total_revenue, 65.0);
        assert_eq!(summary.transaction_count, 3);
        assert_eq!(summary.monthly.len(), 2);
        assert_eq!(summary.monthly[0].month, NaiveDate::from_ymd_opt(2010, 12, 1).unwrap());
        assert_eq!(summary.monthly[0].revenue, 40.0);

        let best = summary.best_month.unwrap();
        assert_eq!(best.revenue, 40.0);

        assert_eq!(summary.by_weekday.len(), 7);
        assert_eq!(summary.by_weekday[1], (Weekday::Tue, 10.0));
        assert_eq!(summary.by_weekday[5], (Weekday::Sat, 25.0));
        assert_eq!(summary.by_weekday[6], (Weekday::Sun, 0.0));
        assert_eq!(summary.by_hour, vec![(9, 35.0), (14, 30.0)]);
    }

    #[test]
    fn test_seasonality_empty() {
        let summary = seasonality(&[]);
        assert_eq!(summary.total_revenue, 0.0);
        assert!(summary.best_month.is_none());
    }

    fn rfm(id: &str, monetary: f64, segment: Segment) -> CustomerRfm {
        CustomerRfm {
            customer_id: id.to_string(),
            recency: 1,
            frequency: 1,
            monetary,
            r_score: 1,
            f_score: 1,
            m_score: 1,
            rf_score: "11".to_string(),
            segment,
        }
    }

    #[test]
    fn test_segment_summary_and_drill_down() {
        let table = RfmTable {
            snapshot_date: at(2011, 1, 2, 0),
            customers: vec![
                rfm("1", 5.0, Segment::Champions),
                rfm("2", 50.0, Segment::Hibernating),
                rfm("3", 20.0, Segment::Hibernating),
                rfm("4", 70.0, Segment::Hibernating),
            ],
        };

        let summary = segment_summary(&table);
        assert_eq!(summary[0].segment, Segment::Hibernating);
        assert_eq!(summary[0].customers, 3);
        assert_eq!(summary[0].revenue, 140.0);
        assert_eq!(summary[1].segment, Segment::Champions);

        let top: Vec<&str> = top_customers(&table, Segment::Hibernating, 2)
            .iter()
            .map(|c| c.customer_id.as_str())
            .collect();
        assert_eq!(top, vec!["4", "2"]);
    }
}
