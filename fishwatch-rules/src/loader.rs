use std::collections::HashSet;
use std::fs;
use std::path::Path;

use fishwatch_model::rule::{BusinessRule, RuleDefinition, SanityRule};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RuleError;

/// YAML/JSON document holding rule definitions of every category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleDocument {
    #[serde(default)]
    pub sanity_rules: Vec<SanityRule>,
    #[serde(default)]
    pub custom_rules: Vec<RuleDefinition>,
    #[serde(default)]
    pub business_rules: Vec<BusinessRule>,
}

impl RuleDocument {
    fn append(&mut self, mut other: RuleDocument) {
        self.sanity_rules.append(&mut other.sanity_rules);
        self.custom_rules.append(&mut other.custom_rules);
        self.business_rules.append(&mut other.business_rules);
    }
}

/// Loads rule definitions from a file, or from every `.yaml`, `.yml` and
/// `.json` file of a directory.
pub fn load_rules(path: impl AsRef<Path>) -> Result<RuleDocument, RuleError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RuleError::MissingPath(path.display().to_string()));
    }

    let document = if path.is_dir() {
        load_from_directory(path)?
    } else {
        load_from_file(path)?
    };

    deduplicate(&document)?;
    debug!(
        path = %path.display(),
        sanity = document.sanity_rules.len(),
        custom = document.custom_rules.len(),
        business = document.business_rules.len(),
        "loaded rule definitions"
    );
    Ok(document)
}

fn load_from_directory(path: &Path) -> Result<RuleDocument, RuleError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path).map_err(|err| RuleError::from_io(path, err))? {
        let entry = entry.map_err(|err| RuleError::from_io(path, err))?;
        let file_type = entry
            .file_type()
            .map_err(|err| RuleError::from_io(entry.path(), err))?;
        if file_type.is_dir() {
            continue;
        }

        if let Some(ext) = entry.path().extension().and_then(|value| value.to_str()) {
            if matches!(ext, "json" | "yaml" | "yml") {
                entries.push(entry.path());
            }
        }
    }
    entries.sort();

    let mut document = RuleDocument::default();
    for entry in entries {
        document.append(load_from_file(&entry)?);
    }
    Ok(document)
}

fn load_from_file(path: &Path) -> Result<RuleDocument, RuleError> {
    let raw = fs::read_to_string(path).map_err(|err| RuleError::from_io(path, err))?;
    if raw.trim().is_empty() {
        return Ok(RuleDocument::default());
    }
    serde_yaml::from_str::<RuleDocument>(&raw)
        .map_err(|err| RuleError::parse_error(path.to_path_buf(), err.to_string()))
}

fn deduplicate(document: &RuleDocument) -> Result<(), RuleError> {
    let mut seen = HashSet::new();
    for rule in &document.sanity_rules {
        if !seen.insert(format!("sanity:{}", rule.name)) {
            return Err(RuleError::DuplicateRule {
                id: rule.name.clone(),
            });
        }
    }
    for rule in &document.custom_rules {
        if !rule.guid.trim().is_empty() && !seen.insert(format!("custom:{}", rule.guid)) {
            return Err(RuleError::DuplicateRule {
                id: rule.guid.clone(),
            });
        }
    }
    for rule in &document.business_rules {
        if !seen.insert(format!("business:{}", rule.br_id)) {
            return Err(RuleError::DuplicateRule {
                id: rule.br_id.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SANITY: &str = r#"
sanity_rules:
  - name: Lat missing
    expression: latitude == null
    description: Latitude must be reported
"#;

    const CUSTOM: &str = r#"
custom_rules:
  - guid: 2f1c
    name: SWE in DNK
    segments:
      - criteria: ASSET
        subCriteria: FLAG_STATE
        condition: EQ
        value: SWE
        logicOperator: AND
        order: 0
      - criteria: AREA
        subCriteria: AREA_CODE
        condition: EQ
        value: DNK
        order: 1
    aggregateInvocations: true
    actions:
      - action: TICKET
"#;

    const BUSINESS: &str = r#"
business_rules:
  - brId: SALE-L01-00-0400
    factType: SALES_PRICE
    expression: chargeAmount == 0
    message: Price must be positive
    errorType: WARNING
    level: L01
    propertyNames: chargeAmount
"#;

    #[test]
    fn loads_directory_of_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.yaml"), SANITY).expect("write");
        fs::write(dir.path().join("b.yml"), CUSTOM).expect("write");
        fs::write(dir.path().join("c.yaml"), BUSINESS).expect("write");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let document = load_rules(dir.path()).expect("load");
        assert_eq!(document.sanity_rules.len(), 1);
        assert_eq!(document.custom_rules.len(), 1);
        assert_eq!(document.custom_rules[0].segments.len(), 2);
        assert!(document.custom_rules[0].active);
        assert!(document.custom_rules[0].aggregate_invocations);

        let business = &document.business_rules[0];
        assert_eq!(business.fact_type, fishwatch_model::fact::FactType::SalesPrice);
        assert_eq!(business.error_type, fishwatch_model::fact::Severity::Warning);
        assert_eq!(business.property_names.as_deref(), Some("chargeAmount"));
        assert!(business.active);
    }

    #[test]
    fn rejects_duplicates_and_garbage() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "{}\n  - name: Lat missing\n    expression: latitude > 90\n", SANITY.trim_end())
            .expect("write");
        assert!(matches!(
            load_rules(file.path()),
            Err(RuleError::DuplicateRule { .. })
        ));

        let mut garbage = tempfile::NamedTempFile::new().expect("tempfile");
        write!(garbage, "sanity_rules: 12").expect("write");
        assert!(matches!(load_rules(garbage.path()), Err(RuleError::Parse { .. })));

        assert!(matches!(
            load_rules("/definitely/not/here"),
            Err(RuleError::MissingPath(_))
        ));
    }
}
