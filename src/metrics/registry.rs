use super::{its, scm, Metric};
use crate::adapter::DataSource;
use crate::error::{Error, Result};

/// Every metric, grouped by data source.
pub fn all() -> Vec<Box<dyn Metric>> {
    vec![
        Box::new(scm::Commits),
        Box::new(scm::Authors),
        Box::new(scm::Committers),
        Box::new(scm::Repositories),
        Box::new(its::Opened),
        Box::new(its::Openers),
        Box::new(its::Closed),
        Box::new(its::Closers),
        Box::new(its::Bmi),
    ]
}

pub fn lookup(id: &str) -> Result<Box<dyn Metric>> {
    let id = id.trim().to_lowercase();
    all()
        .into_iter()
        .find(|m| m.id() == id)
        .ok_or(Error::UnknownMetric(id))
}

pub fn for_source(source: DataSource) -> Vec<Box<dyn Metric>> {
    all()
        .into_iter()
        .filter(|m| m.data_source() == source)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<&str> = all().iter().map(|m| m.id()).collect();
        let n = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), n);
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("Commits").unwrap().data_source(), DataSource::Scm);
        assert!(matches!(lookup("stars"), Err(Error::UnknownMetric(_))));
    }

    #[test]
    fn test_for_source() {
        let its: Vec<&str> = for_source(DataSource::Its).iter().map(|m| m.id()).collect();
        assert_eq!(its, vec!["opened", "openers", "closed", "closers", "bmi"]);
    }
}
