//! Typed workload resolved from [`BenchConfig`] before the run starts.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::config::BenchConfig;
use crate::distribution::CumulativeDistribution;
use crate::error::{BenchError, Result};

/// One query template of the mix
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTemplate {
    pub text: String,
    pub read_only: bool,
    pub weight: f64,
}

/// Half-open range used for `__rand_int__` substitution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomIntBounds {
    pub min: i64,
    pub max: i64,
}

impl RandomIntBounds {
    pub fn new(min: i64, max: i64) -> Result<Self> {
        if max <= min {
            return Err(BenchError::Config(format!(
                "random int bounds are empty: [{}, {})",
                min, max
            )));
        }
        Ok(Self { min, max })
    }
}

/// How term records are assigned to requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TermSelection {
    /// `ordinal mod record count`
    #[default]
    Seq,
    /// Uniform draw per request
    Rand,
}

impl FromStr for TermSelection {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "seq" => Ok(TermSelection::Seq),
            "rand" => Ok(TermSelection::Rand),
            other => Err(BenchError::Config(format!(
                "unknown term selection mode '{}', expected 'seq' or 'rand'",
                other
            ))),
        }
    }
}

/// Placeholder names plus the rows that fill them
#[derive(Debug, Clone, PartialEq)]
pub struct TermSource {
    placeholders: Vec<String>,
    records: Vec<Vec<String>>,
    selection: TermSelection,
}

impl TermSource {
    /// Parse CSV whose header row names the placeholders. Quoted fields may
    /// carry commas, quotes and newlines; whitespace is kept as written.
    pub fn parse(content: &str, selection: TermSelection) -> Result<Self> {
        let invalid = |e: csv::Error| BenchError::Config(format!("invalid term source: {}", e));
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::None)
            .flexible(true)
            .from_reader(content.as_bytes());

        let placeholders: Vec<String> = reader
            .headers()
            .map_err(invalid)?
            .iter()
            .map(str::to_string)
            .collect();
        if placeholders.is_empty() {
            return Err(BenchError::Config("term source is empty".to_string()));
        }
        if let Some(blank) = placeholders.iter().position(|p| p.is_empty()) {
            return Err(BenchError::Config(format!(
                "term source header has an empty column at position {}",
                blank
            )));
        }

        let mut records = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(invalid)?;
            if record.len() != placeholders.len() {
                return Err(BenchError::Config(format!(
                    "term source record {} has {} fields, header has {}",
                    row + 1,
                    record.len(),
                    placeholders.len()
                )));
            }
            records.push(record.iter().map(str::to_string).collect());
        }

        if records.is_empty() {
            return Err(BenchError::Config(
                "term source has a header but no records".to_string(),
            ));
        }

        Ok(Self {
            placeholders,
            records,
            selection,
        })
    }

    /// Read and parse a term file
    pub fn from_file(path: &Path, selection: TermSelection) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("unable to read term file {}: {}", path.display(), e))
        })?;
        Self::parse(&content, selection)
    }

    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn record(&self, index: usize) -> &[String] {
        &self.records[index]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn selection(&self) -> TermSelection {
        self.selection
    }
}

/// Immutable description of what the workers send
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub name: String,
    queries: Vec<QueryTemplate>,
    pub random_ints: RandomIntBounds,
    pub terms: Option<TermSource>,
}

impl WorkloadSpec {
    pub fn new(
        name: impl Into<String>,
        queries: Vec<QueryTemplate>,
        random_ints: RandomIntBounds,
        terms: Option<TermSource>,
    ) -> Result<Self> {
        if queries.is_empty() {
            return Err(BenchError::Config("no queries were provided".to_string()));
        }
        Ok(Self {
            name: name.into(),
            queries,
            random_ints,
            terms,
        })
    }

    /// Build the spec from configuration. Read-write queries keep their
    /// position ahead of the read-only ones.
    pub fn from_config(config: &BenchConfig, terms: Option<TermSource>) -> Result<Self> {
        config.validate()?;

        let read_write = config.parameters.queries.iter().map(|q| QueryTemplate {
            text: q.query.clone(),
            read_only: false,
            weight: q.ratio,
        });
        let read_only = config.parameters.ro_queries.iter().map(|q| QueryTemplate {
            text: q.query.clone(),
            read_only: true,
            weight: q.ratio,
        });

        let random_ints = RandomIntBounds::new(
            config.parameters.random_int_min,
            config.parameters.random_int_max,
        )?;

        Self::new(
            config.name.clone(),
            read_write.chain(read_only).collect(),
            random_ints,
            terms,
        )
    }

    /// Derive the sampling table from the query weights
    pub fn distribution(&self) -> Result<CumulativeDistribution> {
        let weights: Vec<f64> = self.queries.iter().map(|q| q.weight).collect();
        CumulativeDistribution::build(&weights)
    }

    pub fn queries(&self) -> &[QueryTemplate] {
        &self.queries
    }

    pub fn query(&self, index: usize) -> &QueryTemplate {
        &self.queries[index]
    }

    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    /// Query texts in index order, used as report keys
    pub fn query_names(&self) -> Vec<String> {
        self.queries.iter().map(|q| q.text.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;

    #[test]
    fn test_parse_term_source() {
        let source = TermSource::parse(
            "__name__,__age__\nalice,30\r\nbob, 41\n\n",
            TermSelection::Seq,
        )
        .unwrap();
        assert_eq!(source.placeholders(), &["__name__", "__age__"]);
        assert_eq!(source.len(), 2);
        assert_eq!(source.record(1), &["bob", " 41"]);
    }

    #[test]
    fn test_quoted_terms_keep_commas_and_padding() {
        let source = TermSource::parse(
            "__name__,__age__\n\"Smith, John\",30\n\"say \"\"hi\"\"\",  7 \n\"two\nlines\",1\n",
            TermSelection::Seq,
        )
        .unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.record(0), &["Smith, John", "30"]);
        assert_eq!(source.record(1), &["say \"hi\"", "  7 "]);
        assert_eq!(source.record(2), &["two\nlines", "1"]);
    }

    #[test]
    fn test_malformed_term_source_is_config_error() {
        assert!(TermSource::parse("", TermSelection::Seq).unwrap_err().is_config());
        assert!(TermSource::parse("__a__,__b__\n1\n", TermSelection::Seq)
            .unwrap_err()
            .is_config());
        assert!(TermSource::parse("__a__\n", TermSelection::Rand)
            .unwrap_err()
            .is_config());
        assert!(TermSource::parse("__a__,,__c__\n1,2,3\n", TermSelection::Seq).is_err());
    }

    #[test]
    fn test_selection_mode_from_str() {
        assert_eq!("seq".parse::<TermSelection>().unwrap(), TermSelection::Seq);
        assert_eq!("rand".parse::<TermSelection>().unwrap(), TermSelection::Rand);
        assert!("shuffle".parse::<TermSelection>().is_err());
    }

    #[test]
    fn test_from_config_orders_read_write_first() {
        let mut config = BenchConfig::default();
        config.parameters.ro_queries.push(QueryConfig {
            query: "MATCH (n) RETURN n".to_string(),
            ratio: 0.4,
        });
        config.parameters.queries.push(QueryConfig {
            query: "CREATE (n)".to_string(),
            ratio: 0.6,
        });

        let spec = WorkloadSpec::from_config(&config, None).unwrap();
        assert_eq!(spec.query_count(), 2);
        assert!(!spec.query(0).read_only);
        assert!(spec.query(1).read_only);
        assert_eq!(spec.query_names(), vec!["CREATE (n)", "MATCH (n) RETURN n"]);

        let cdf = spec.distribution().unwrap();
        assert_eq!(cdf.len(), 2);
    }

    #[test]
    fn test_from_config_rejects_bad_ratios() {
        let mut config = BenchConfig::default();
        config.parameters.queries.push(QueryConfig {
            query: "CREATE (n)".to_string(),
            ratio: 0.5,
        });
        let spec = WorkloadSpec::from_config(&config, None).unwrap();
        assert!(spec.distribution().unwrap_err().is_config());
    }
}
