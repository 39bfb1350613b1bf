//! Pharmacy activity report over a calendar period.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{catalogue_medicament, medicament, purchase_record, sale, sale_line, stock_lot};
use crate::errors::ServiceError;

const TOP_SELLERS: usize = 5;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReportPeriod {
    /// Monday 00:00 UTC through Sunday
    Week,
    Month,
    Year,
    #[default]
    All,
}

/// Half-open `[start, end)` window of a period containing `now`; `None` for
/// [`ReportPeriod::All`].
pub fn period_window(
    period: ReportPeriod,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let today = now.date_naive();
    let (start, end) = match period {
        ReportPeriod::All => return None,
        ReportPeriod::Week => {
            let start =
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
            (start, start + Duration::days(7))
        }
        ReportPeriod::Month => {
            let start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?;
            let end = if today.month() == 12 {
                NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?
            } else {
                NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)?
            };
            (start, end)
        }
        ReportPeriod::Year => (
            NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
            NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?,
        ),
    };
    Some((
        Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0)?),
        Utc.from_utc_datetime(&end.and_hms_opt(0, 0, 0)?),
    ))
}

/// Grouping key for the revenue series: months over a year, days otherwise.
pub fn bucket_key(period: ReportPeriod, at: DateTime<Utc>) -> String {
    match period {
        ReportPeriod::Year => at.format("%Y-%m").to_string(),
        _ => at.format("%Y-%m-%d").to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TopSeller {
    pub medicament_id: Uuid,
    pub name: String,
    pub units: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LowStockLot {
    pub lot_id: Uuid,
    pub medicament_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub expiry_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RevenueBucket {
    pub bucket: String,
    #[schema(value_type = String)]
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PharmacyReport {
    pub period: ReportPeriod,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[schema(value_type = String)]
    pub revenue: Decimal,
    #[schema(value_type = String)]
    pub average_basket: Decimal,
    #[schema(value_type = String)]
    pub purchase_spend: Decimal,
    pub sale_count: u64,
    pub units_sold: i64,
    pub top_sellers: Vec<TopSeller>,
    pub low_stock: Vec<LowStockLot>,
    pub revenue_by_bucket: Vec<RevenueBucket>,
}

/// Rows a report is computed from, already scoped to one clinic and period.
#[derive(Debug, Default)]
pub struct ReportData {
    pub sales: Vec<sale::Model>,
    pub lines: Vec<sale_line::Model>,
    pub purchases: Vec<purchase_record::Model>,
    pub low_lots: Vec<stock_lot::Model>,
    pub names: HashMap<Uuid, String>,
}

/// Pure aggregation over [`ReportData`].
pub fn build_report(
    period: ReportPeriod,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    data: ReportData,
) -> PharmacyReport {
    let name_of = |id: &Uuid| data.names.get(id).cloned().unwrap_or_default();

    let revenue: Decimal = data.sales.iter().map(|s| s.total).sum();
    let sale_count = data.sales.len() as u64;
    let average_basket = if sale_count == 0 {
        Decimal::ZERO
    } else {
        (revenue / Decimal::from(sale_count)).round_dp(4)
    };

    let purchase_spend: Decimal = data
        .purchases
        .iter()
        .map(|p| Decimal::from(p.quantity) * p.unit_cost)
        .sum();

    let mut units_by_medication: HashMap<Uuid, i64> = HashMap::new();
    for line in &data.lines {
        *units_by_medication.entry(line.medicament_id).or_default() += i64::from(line.quantity);
    }
    let units_sold = units_by_medication.values().sum();

    let mut top_sellers: Vec<TopSeller> = units_by_medication
        .into_iter()
        .map(|(medicament_id, units)| TopSeller {
            name: name_of(&medicament_id),
            medicament_id,
            units,
        })
        .collect();
    top_sellers.sort_by(|a, b| b.units.cmp(&a.units).then_with(|| a.name.cmp(&b.name)));
    top_sellers.truncate(TOP_SELLERS);

    let mut buckets: BTreeMap<String, Decimal> = BTreeMap::new();
    for s in &data.sales {
        *buckets.entry(bucket_key(period, s.sold_at)).or_default() += s.total;
    }

    let low_stock = data
        .low_lots
        .iter()
        .map(|lot| LowStockLot {
            lot_id: lot.id,
            medicament_id: lot.medicament_id,
            name: name_of(&lot.medicament_id),
            quantity: lot.quantity,
            expiry_date: lot.expiry_date,
        })
        .collect();

    PharmacyReport {
        period,
        from: window.map(|(start, _)| start),
        to: window.map(|(_, end)| end),
        revenue,
        average_basket,
        purchase_spend,
        sale_count,
        units_sold,
        top_sellers,
        low_stock,
        revenue_by_bucket: buckets
            .into_iter()
            .map(|(bucket, total)| RevenueBucket { bucket, total })
            .collect(),
    }
}

#[derive(Clone)]
pub struct ReportService {
    db: Arc<DatabaseConnection>,
    low_stock_threshold: i32,
}

impl ReportService {
    pub fn new(db: Arc<DatabaseConnection>, low_stock_threshold: i32) -> Self {
        Self {
            db,
            low_stock_threshold,
        }
    }

    /// Activity of `clinic_id` over the `period` containing `now`.
    #[instrument(skip(self))]
    pub async fn pharmacy_report(
        &self,
        clinic_id: Uuid,
        period: ReportPeriod,
        now: DateTime<Utc>,
    ) -> Result<PharmacyReport, ServiceError> {
        let db = &*self.db;
        let window = period_window(period, now);

        let mut sales_query = sale::Entity::find().filter(sale::Column::ClinicId.eq(clinic_id));
        let mut lines_query = sale_line::Entity::find()
            .join(
                sea_orm::JoinType::InnerJoin,
                sale_line::Relation::Sale.def(),
            )
            .filter(sale::Column::ClinicId.eq(clinic_id));
        let mut purchases_query = purchase_record::Entity::find()
            .filter(purchase_record::Column::ClinicId.eq(clinic_id));

        if let Some((start, end)) = window {
            sales_query = sales_query
                .filter(sale::Column::SoldAt.gte(start))
                .filter(sale::Column::SoldAt.lt(end));
            lines_query = lines_query
                .filter(sale::Column::SoldAt.gte(start))
                .filter(sale::Column::SoldAt.lt(end));
            purchases_query = purchases_query
                .filter(purchase_record::Column::PurchasedAt.gte(start))
                .filter(purchase_record::Column::PurchasedAt.lt(end));
        }

        let sales = sales_query
            .order_by_asc(sale::Column::SoldAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let lines = lines_query.all(db).await.map_err(ServiceError::db_error)?;
        let purchases = purchases_query.all(db).await.map_err(ServiceError::db_error)?;

        let low_lots = stock_lot::Entity::find()
            .filter(stock_lot::Column::ClinicId.eq(clinic_id))
            .filter(stock_lot::Column::Quantity.gt(0))
            .filter(stock_lot::Column::Quantity.lte(self.low_stock_threshold))
            .order_by_asc(stock_lot::Column::Quantity)
            .order_by_asc(stock_lot::Column::ExpiryDate)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let names = medicament::Entity::find()
            .filter(medicament::Column::ClinicId.eq(clinic_id))
            .find_also_related(catalogue_medicament::Entity)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .filter_map(|(med, catalogue)| catalogue.map(|c| (med.id, c.name)))
            .collect();

        Ok(build_report(
            period,
            window,
            ReportData {
                sales,
                lines,
                purchases,
                low_lots,
                names,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn sale_at(sold_at: DateTime<Utc>, total: Decimal) -> sale::Model {
        sale::Model {
            id: Uuid::new_v4(),
            clinic_id: Uuid::nil(),
            sold_at,
            total,
            payment_mode: sale::PaymentMode::Cash,
        }
    }

    fn line_of(medicament_id: Uuid, quantity: i32) -> sale_line::Model {
        sale_line::Model {
            id: Uuid::new_v4(),
            sale_id: Uuid::nil(),
            medicament_id,
            quantity,
            unit_price: dec!(1),
        }
    }

    #[rstest]
    // Wednesday
    #[case(ReportPeriod::Week, at(2024, 5, 15, 13), at(2024, 5, 13, 0), at(2024, 5, 20, 0))]
    // Sunday still belongs to the week started on Monday
    #[case(ReportPeriod::Week, at(2024, 5, 19, 23), at(2024, 5, 13, 0), at(2024, 5, 20, 0))]
    #[case(ReportPeriod::Month, at(2024, 12, 31, 8), at(2024, 12, 1, 0), at(2025, 1, 1, 0))]
    #[case(ReportPeriod::Month, at(2024, 2, 10, 8), at(2024, 2, 1, 0), at(2024, 3, 1, 0))]
    #[case(ReportPeriod::Year, at(2024, 7, 4, 8), at(2024, 1, 1, 0), at(2025, 1, 1, 0))]
    fn window_bounds(
        #[case] period: ReportPeriod,
        #[case] now: DateTime<Utc>,
        #[case] start: DateTime<Utc>,
        #[case] end: DateTime<Utc>,
    ) {
        assert_eq!(period_window(period, now), Some((start, end)));
    }

    #[test]
    fn all_time_has_no_window() {
        assert_eq!(period_window(ReportPeriod::All, Utc::now()), None);
    }

    #[test]
    fn period_parses_from_query_value() {
        assert_eq!(ReportPeriod::from_str("week").unwrap(), ReportPeriod::Week);
        assert_eq!(ReportPeriod::Year.to_string(), "year");
        assert!(ReportPeriod::from_str("semaine").is_err());
    }

    #[test]
    fn empty_report_has_zero_basket() {
        let report = build_report(ReportPeriod::All, None, ReportData::default());
        assert_eq!(report.revenue, Decimal::ZERO);
        assert_eq!(report.average_basket, Decimal::ZERO);
        assert_eq!(report.sale_count, 0);
        assert!(report.top_sellers.is_empty());
    }

    #[test]
    fn aggregates_revenue_basket_and_top_sellers() {
        let para = Uuid::new_v4();
        let amox = Uuid::new_v4();
        let ibu = Uuid::new_v4();
        let names = HashMap::from([
            (para, "Paracetamol".to_string()),
            (amox, "Amoxicilline".to_string()),
            (ibu, "Ibuprofene".to_string()),
        ]);

        let data = ReportData {
            sales: vec![
                sale_at(at(2024, 3, 1, 9), dec!(350)),
                sale_at(at(2024, 3, 1, 17), dec!(100)),
                sale_at(at(2024, 3, 2, 10), dec!(50)),
            ],
            lines: vec![
                line_of(para, 2),
                line_of(amox, 3),
                line_of(para, 1),
                line_of(ibu, 3),
            ],
            purchases: vec![purchase_record::Model {
                id: Uuid::new_v4(),
                clinic_id: Uuid::nil(),
                medicament_id: para,
                quantity: 10,
                unit_cost: dec!(12.5),
                purchased_at: at(2024, 3, 1, 8),
            }],
            low_lots: vec![],
            names,
        };

        let report = build_report(ReportPeriod::Month, None, data);
        assert_eq!(report.revenue, dec!(500));
        assert_eq!(report.sale_count, 3);
        assert_eq!(report.average_basket, dec!(166.6667));
        assert_eq!(report.purchase_spend, dec!(125));
        assert_eq!(report.units_sold, 9);

        let ranking: Vec<(&str, i64)> = report
            .top_sellers
            .iter()
            .map(|t| (t.name.as_str(), t.units))
            .collect();
        assert_eq!(
            ranking,
            vec![("Amoxicilline", 3), ("Ibuprofene", 3), ("Paracetamol", 3)]
        );

        assert_eq!(
            report.revenue_by_bucket,
            vec![
                RevenueBucket {
                    bucket: "2024-03-01".into(),
                    total: dec!(450)
                },
                RevenueBucket {
                    bucket: "2024-03-02".into(),
                    total: dec!(50)
                },
            ]
        );
    }

    #[test]
    fn top_sellers_capped_at_five() {
        let lines = (0..8)
            .map(|i| line_of(Uuid::new_v4(), i + 1))
            .collect::<Vec<_>>();
        let report = build_report(
            ReportPeriod::All,
            None,
            ReportData {
                lines,
                ..Default::default()
            },
        );
        assert_eq!(report.top_sellers.len(), 5);
        assert_eq!(report.top_sellers[0].units, 8);
    }

    #[test]
    fn yearly_buckets_are_months() {
        assert_eq!(bucket_key(ReportPeriod::Year, at(2024, 11, 5, 3)), "2024-11");
        assert_eq!(bucket_key(ReportPeriod::Week, at(2024, 11, 5, 3)), "2024-11-05");
    }
}
