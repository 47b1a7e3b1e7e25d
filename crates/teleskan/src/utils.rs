use std::collections::BTreeMap;

use crate::types::PlanRecord;

#[derive(Debug)]
pub struct PlanStats {
    pub per_provider: BTreeMap<String, usize>,
    pub cheapest: Option<(String, String, u32)>,
    pub average_price: Option<u32>,
    pub with_promotion: usize,
    pub total: usize,
}

impl PlanStats {
    pub fn from_records(records: &[PlanRecord]) -> PlanStats {
        let mut per_provider = BTreeMap::new();
        for record in records {
            *per_provider.entry(record.provider.clone()).or_insert(0) += 1;
        }

        let cheapest = records
            .iter()
            .min_by_key(|r| r.price)
            .map(|r| (r.provider.clone(), r.plan_name.clone(), r.price));

        let average_price = (!records.is_empty()).then(|| {
            let sum: u64 = records.iter().map(|r| u64::from(r.price)).sum();
            (sum / records.len() as u64) as u32
        });

        PlanStats {
            per_provider,
            cheapest,
            average_price,
            with_promotion: records.iter().filter(|r| r.promotion.is_some()).count(),
            total: records.len(),
        }
    }
}

impl std::fmt::Display for PlanStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nStatistics:")?;
        for (provider, count) in &self.per_provider {
            writeln!(f, "  {:<20} {}", provider, count)?;
        }
        if let Some((provider, plan, price)) = &self.cheapest {
            writeln!(f, "  Cheapest:            {} {} ({} kr/md)", provider, plan, price)?;
        }
        if let Some(average) = self.average_price {
            writeln!(f, "  Average price:       {} kr/md", average)?;
        }
        writeln!(f, "  With promotion:      {}", self.with_promotion)?;
        writeln!(f, "  Total:               {}", self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, PlanDetails};

    fn plan(provider: &str, price: u32, promotion: Option<&str>) -> PlanRecord {
        PlanRecord {
            id: 0,
            provider: provider.to_string(),
            category: Category::Mobile,
            plan_name: format!("{provider} 50 GB"),
            price,
            speed_mbit: None,
            data_gb: Some(50),
            channel_count: None,
            contract_months: 0,
            promotion: promotion.map(str::to_string),
            features: Vec::new(),
            rating: None,
            url: None,
            details: PlanDetails::default(),
        }
    }

    #[test]
    fn test_stats_from_records() {
        let records = vec![
            plan("Oister", 99, None),
            plan("YouSee", 199, Some("Første måned gratis")),
            plan("Oister", 150, None),
        ];
        let stats = PlanStats::from_records(&records);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.per_provider["Oister"], 2);
        assert_eq!(stats.with_promotion, 1);
        assert_eq!(stats.average_price, Some(149));
        assert_eq!(
            stats.cheapest,
            Some(("Oister".to_string(), "Oister 50 GB".to_string(), 99))
        );
    }

    #[test]
    fn test_stats_for_empty_run() {
        let stats = PlanStats::from_records(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.cheapest, None);
        assert_eq!(stats.average_price, None);
        assert!(stats.to_string().contains("Total:               0"));
    }
}
