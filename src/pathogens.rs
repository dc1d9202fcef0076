use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dose_response::{DoseResponseModel, ModelKind};
use crate::{QmraError, Result};

/// One fitted dose-response model for a pathogen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DoseResponseParameters {
    #[serde(flatten)]
    pub model: DoseResponseModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_citation: Option<String>,
}

impl DoseResponseParameters {
    pub fn new(model: DoseResponseModel) -> Self {
        Self {
            model,
            source_citation: None,
        }
    }

    pub fn cited(model: DoseResponseModel, citation: &str) -> Self {
        Self {
            model,
            source_citation: Some(citation.to_string()),
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.model.kind()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathogenRecord {
    pub name: String,
    /// Declaration order matters: it is the fallback order for model selection.
    pub dose_response_models: Vec<DoseResponseParameters>,
    pub illness_to_infection_ratio: f64,
    #[serde(default)]
    pub dalys_per_case: f64,
    /// Routes this record applies to. Empty means any route.
    #[serde(default)]
    pub exposure_routes: Vec<String>,
}

impl PathogenRecord {
    pub fn validate(&self) -> Result<()> {
        if self.dose_response_models.is_empty() {
            return Err(QmraError::invalid(
                &self.name,
                "at least one dose-response model is required",
            ));
        }
        for params in &self.dose_response_models {
            params.model.validate()?;
        }
        if !(0.0..=1.0).contains(&self.illness_to_infection_ratio) {
            return Err(QmraError::invalid(
                &self.name,
                "illness_to_infection_ratio must lie in [0, 1]",
            ));
        }
        if !(self.dalys_per_case >= 0.0 && self.dalys_per_case.is_finite()) {
            return Err(QmraError::invalid(&self.name, "dalys_per_case must be >= 0"));
        }
        Ok(())
    }

    /// Preferred model: beta-Poisson, then beta-binomial, then the first
    /// declared model.
    pub fn default_model(&self) -> Option<&DoseResponseParameters> {
        [ModelKind::BetaPoisson, ModelKind::BetaBinomial]
            .into_iter()
            .find_map(|kind| self.model(kind))
            .or_else(|| self.dose_response_models.first())
    }

    pub fn model(&self, kind: ModelKind) -> Option<&DoseResponseParameters> {
        self.dose_response_models.iter().find(|p| p.kind() == kind)
    }

    pub fn supports_route(&self, route: &str) -> bool {
        self.exposure_routes.is_empty()
            || self
                .exposure_routes
                .iter()
                .any(|r| r.eq_ignore_ascii_case(route.trim()))
    }
}

/// Everything a scenario needs from the reference data.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPathogen {
    pub name: String,
    pub model: DoseResponseModel,
    pub illness_to_infection_ratio: f64,
    pub dalys_per_case: f64,
}

/// Pathogen records keyed by normalized name.
#[derive(Clone, Debug, Default)]
pub struct PathogenParameterStore {
    records: BTreeMap<String, PathogenRecord>,
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

impl PathogenParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a record after validating it.
    pub fn insert(&mut self, record: PathogenRecord) -> Result<()> {
        record.validate()?;
        self.records.insert(normalize_name(&record.name), record);
        Ok(())
    }

    /// Inserts every record of `other`, replacing same-named entries.
    pub fn extend(&mut self, other: PathogenParameterStore) {
        self.records.extend(other.records);
    }

    pub fn get(&self, name: &str) -> Result<&PathogenRecord> {
        self.records
            .get(&normalize_name(name))
            .ok_or_else(|| QmraError::UnknownPathogen(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(&normalize_name(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn default_model(&self, name: &str) -> Result<&DoseResponseParameters> {
        let record = self.get(name)?;
        record
            .default_model()
            .ok_or_else(|| QmraError::invalid(name, "no dose-response model declared"))
    }

    pub fn model(&self, name: &str, kind: ModelKind) -> Result<&DoseResponseParameters> {
        self.get(name)?.model(kind).ok_or_else(|| {
            QmraError::invalid(name, format!("no '{kind}' dose-response model declared"))
        })
    }

    /// Resolves a pathogen to its model and health ratios, using `kind` when
    /// given and the default selection policy otherwise.
    pub fn resolve(&self, name: &str, kind: Option<ModelKind>) -> Result<ResolvedPathogen> {
        let record = self.get(name)?;
        let params = match kind {
            Some(kind) => self.model(name, kind)?,
            None => self.default_model(name)?,
        };
        Ok(ResolvedPathogen {
            name: record.name.clone(),
            model: params.model,
            illness_to_infection_ratio: record.illness_to_infection_ratio,
            dalys_per_case: record.dalys_per_case,
        })
    }

    /// Parses a JSON array of pathogen records.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let records: Vec<PathogenRecord> = serde_json::from_str(json)?;
        let mut store = Self::new();
        for record in records {
            store.insert(record)?;
        }
        Ok(store)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Literature dose-response fits for common waterborne pathogens.
    pub fn builtin() -> Self {
        use DoseResponseModel as M;

        let ingestion = || vec!["ingestion".to_string()];
        let records = vec![
            PathogenRecord {
                name: "norovirus".into(),
                dose_response_models: vec![
                    DoseResponseParameters::cited(
                        M::BetaBinomial {
                            alpha: 0.04,
                            beta: 0.055,
                        },
                        "Teunis et al. (2008)",
                    ),
                    DoseResponseParameters::cited(
                        M::FractionalPoisson { p: 0.72, mu: 1106.0 },
                        "Messner et al. (2014)",
                    ),
                ],
                illness_to_infection_ratio: 0.6,
                dalys_per_case: 9.0e-4,
                exposure_routes: ingestion(),
            },
            PathogenRecord {
                name: "rotavirus".into(),
                dose_response_models: vec![DoseResponseParameters::cited(
                    M::BetaPoisson {
                        alpha: 0.253,
                        beta: 0.426,
                    },
                    "Haas et al. (1999)",
                )],
                illness_to_infection_ratio: 0.5,
                dalys_per_case: 1.4e-2,
                exposure_routes: ingestion(),
            },
            PathogenRecord {
                name: "adenovirus".into(),
                dose_response_models: vec![DoseResponseParameters::cited(
                    M::Exponential { r: 0.4172 },
                    "Haas et al. (1999)",
                )],
                illness_to_infection_ratio: 0.5,
                dalys_per_case: 2.6e-3,
                exposure_routes: vec!["inhalation".into(), "ingestion".into()],
            },
            PathogenRecord {
                name: "campylobacter".into(),
                dose_response_models: vec![DoseResponseParameters::cited(
                    M::BetaPoisson {
                        alpha: 0.145,
                        beta: 7.59,
                    },
                    "Medema et al. (1996)",
                )],
                illness_to_infection_ratio: 0.3,
                dalys_per_case: 4.6e-3,
                exposure_routes: ingestion(),
            },
            PathogenRecord {
                name: "e_coli_o157".into(),
                dose_response_models: vec![DoseResponseParameters::cited(
                    M::BetaPoisson {
                        alpha: 0.4,
                        beta: 37.5,
                    },
                    "Teunis et al. (2008)",
                )],
                illness_to_infection_ratio: 0.3,
                dalys_per_case: 5.5e-2,
                exposure_routes: ingestion(),
            },
            PathogenRecord {
                name: "salmonella".into(),
                dose_response_models: vec![DoseResponseParameters::cited(
                    M::BetaPoisson {
                        alpha: 0.3126,
                        beta: 2884.0,
                    },
                    "Haas et al. (1999)",
                )],
                illness_to_infection_ratio: 0.3,
                dalys_per_case: 2.4e-3,
                exposure_routes: ingestion(),
            },
            PathogenRecord {
                name: "cryptosporidium".into(),
                dose_response_models: vec![DoseResponseParameters::cited(
                    M::Exponential { r: 0.0042 },
                    "US EPA LT2ESWTR (2006)",
                )],
                illness_to_infection_ratio: 0.7,
                dalys_per_case: 1.5e-3,
                exposure_routes: ingestion(),
            },
            PathogenRecord {
                name: "giardia".into(),
                dose_response_models: vec![DoseResponseParameters::cited(
                    M::Exponential { r: 0.0199 },
                    "Rose et al. (1991)",
                )],
                illness_to_infection_ratio: 0.3,
                dalys_per_case: 1.7e-3,
                exposure_routes: ingestion(),
            },
        ];

        let records = records
            .into_iter()
            .map(|record| (normalize_name(&record.name), record))
            .collect();
        Self { records }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(models: Vec<DoseResponseModel>) -> PathogenRecord {
        PathogenRecord {
            name: "Test Pathogen".into(),
            dose_response_models: models.into_iter().map(DoseResponseParameters::new).collect(),
            illness_to_infection_ratio: 0.5,
            dalys_per_case: 0.01,
            exposure_routes: vec!["ingestion".into()],
        }
    }

    #[test]
    fn builtin_records_are_valid() {
        let store = PathogenParameterStore::builtin();
        assert!(store.len() >= 8);
        for name in store.names() {
            store.get(name).unwrap().validate().unwrap();
        }
    }

    #[test]
    fn default_model_prefers_beta_family() {
        let exp = DoseResponseModel::Exponential { r: 0.1 };
        let bb = DoseResponseModel::BetaBinomial {
            alpha: 0.1,
            beta: 0.2,
        };
        let bp = DoseResponseModel::BetaPoisson {
            alpha: 0.3,
            beta: 4.0,
        };

        assert_eq!(record(vec![exp, bb, bp]).default_model().unwrap().model, bp);
        assert_eq!(record(vec![exp, bb]).default_model().unwrap().model, bb);
        assert_eq!(record(vec![exp]).default_model().unwrap().model, exp);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let store = PathogenParameterStore::builtin();
        let resolved = store.resolve("Norovirus", None).unwrap();
        assert_eq!(resolved.model.kind(), ModelKind::BetaBinomial);
        assert!(store.contains("E-coli O157"));
    }

    #[test]
    fn resolve_with_explicit_kind() {
        let store = PathogenParameterStore::builtin();
        let resolved = store
            .resolve("norovirus", Some(ModelKind::FractionalPoisson))
            .unwrap();
        assert_eq!(resolved.model.kind(), ModelKind::FractionalPoisson);
        assert!(store.resolve("norovirus", Some(ModelKind::Weibull)).is_err());
    }

    #[test]
    fn unknown_pathogen_is_reported() {
        let store = PathogenParameterStore::builtin();
        assert!(matches!(
            store.get("prion"),
            Err(QmraError::UnknownPathogen(name)) if name == "prion"
        ));
    }

    #[test]
    fn loads_records_from_json() {
        let json = r#"[
            {
                "name": "Legionella",
                "dose_response_models": [
                    {"model": "exponential", "r": 0.06, "source_citation": "Armstrong and Haas (2007)"}
                ],
                "illness_to_infection_ratio": 0.1,
                "exposure_routes": ["inhalation"]
            }
        ]"#;
        let store = PathogenParameterStore::from_json_str(json).unwrap();
        let record = store.get("legionella").unwrap();
        assert_eq!(record.dalys_per_case, 0.0);
        assert!(record.supports_route("Inhalation"));
        assert!(!record.supports_route("ingestion"));
        assert_eq!(
            record.dose_response_models[0].source_citation.as_deref(),
            Some("Armstrong and Haas (2007)")
        );
    }

    #[test]
    fn rejects_invalid_records() {
        let mut store = PathogenParameterStore::new();
        assert!(store.insert(record(vec![])).is_err());

        let mut bad_ratio = record(vec![DoseResponseModel::Exponential { r: 0.1 }]);
        bad_ratio.illness_to_infection_ratio = 1.5;
        assert!(store.insert(bad_ratio).is_err());

        let json = r#"[{"name": "x", "dose_response_models": [{"model": "exponential", "r": 2.0}],
                        "illness_to_infection_ratio": 0.5}]"#;
        assert!(PathogenParameterStore::from_json_str(json).is_err());
    }
}
