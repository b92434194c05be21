//! Profile records and verification against a stored profile.

use std::collections::BTreeMap;

use anyhow::Result;
use faceprofile_vision::{Analyzer, FaceAnalysis};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Textual description of a face. Not stored here; clients keep it and send
/// it back for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub description: String,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub skin_tone: Option<String>,
    #[serde(default)]
    pub hair_color: Option<String>,
}

impl From<FaceAnalysis> for Profile {
    fn from(analysis: FaceAnalysis) -> Self {
        let attrs = analysis.attributes;
        Self {
            description: analysis.description,
            age: attrs.as_ref().map(|a| a.age.to_string()),
            gender: attrs.as_ref().map(|a| a.gender.to_string()),
            skin_tone: attrs.as_ref().map(|a| a.skin_tone.to_string()),
            hair_color: attrs
                .as_ref()
                .and_then(|a| a.hair_color)
                .map(|c| c.to_string()),
        }
    }
}

/// Expected (reference) value and observed value of a differing field
pub type Mismatch = (Option<String>, Option<String>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    #[serde(rename = "match")]
    pub is_match: bool,
    pub mismatches: BTreeMap<String, Mismatch>,
}

pub fn create_profile(analyzer: &Analyzer, img: &DynamicImage) -> Result<Profile> {
    Ok(Profile::from(analyzer.analyze(img)?))
}

pub fn verify_profile(
    analyzer: &Analyzer,
    img: &DynamicImage,
    reference: &Profile,
) -> Result<VerificationResult> {
    let observed = create_profile(analyzer, img)?;
    Ok(compare(reference, &observed))
}

/// Field-by-field comparison; `description` is not compared
pub fn compare(reference: &Profile, observed: &Profile) -> VerificationResult {
    let fields = [
        ("age", &reference.age, &observed.age),
        ("gender", &reference.gender, &observed.gender),
        ("skin_tone", &reference.skin_tone, &observed.skin_tone),
        ("hair_color", &reference.hair_color, &observed.hair_color),
    ];

    let mismatches: BTreeMap<String, Mismatch> = fields
        .into_iter()
        .filter(|(_, expected, actual)| expected != actual)
        .map(|(name, expected, actual)| (name.to_string(), (expected.clone(), actual.clone())))
        .collect();

    VerificationResult {
        is_match: mismatches.is_empty(),
        mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(age: &str) -> Profile {
        Profile {
            description: "whatever".to_string(),
            age: Some(age.to_string()),
            gender: Some("Male".to_string()),
            skin_tone: Some("brown".to_string()),
            hair_color: Some("black".to_string()),
        }
    }

    #[test]
    fn test_identical_profiles_match() {
        let result = compare(&profile("(25-32)"), &profile("(25-32)"));
        assert!(result.is_match);
        assert!(result.mismatches.is_empty());
    }

    #[test]
    fn test_description_is_ignored() {
        let mut other = profile("(25-32)");
        other.description = "something else".to_string();
        assert!(compare(&profile("(25-32)"), &other).is_match);
    }

    #[test]
    fn test_single_mismatch() {
        let result = compare(&profile("(25-32)"), &profile("(8-12)"));
        assert!(!result.is_match);
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(
            result.mismatches["age"],
            (Some("(25-32)".to_string()), Some("(8-12)".to_string()))
        );
    }

    #[test]
    fn test_null_equals_null() {
        let empty = Profile {
            description: "No face detected.".to_string(),
            age: None,
            gender: None,
            skin_tone: None,
            hair_color: None,
        };
        assert!(compare(&empty, &empty.clone()).is_match);

        let result = compare(&profile("(25-32)"), &empty);
        assert_eq!(result.mismatches.len(), 4);
        assert_eq!(result.mismatches["hair_color"], (Some("black".to_string()), None));
    }

    #[test]
    fn test_wire_format() {
        let result = compare(&profile("(25-32)"), &profile("(8-12)"));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "match": false,
                "mismatches": { "age": ["(25-32)", "(8-12)"] }
            })
        );
    }

    #[test]
    fn test_profile_fields_default_to_null() {
        let p: Profile = serde_json::from_str(r#"{"description": "x", "age": "(0-2)"}"#).unwrap();
        assert_eq!(p.age.as_deref(), Some("(0-2)"));
        assert_eq!(p.gender, None);
        assert_eq!(p.hair_color, None);
    }
}
