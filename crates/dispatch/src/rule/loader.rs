//! 규칙 파일 로더 -- YAML 규칙 파일을 디스크에서 로드합니다.
//!
//! 규칙 경로는 단일 파일이거나 `.yml`/`.yaml` 파일을 담은 디렉토리입니다.
//! 한 파일에는 규칙 하나 또는 규칙 목록(YAML 시퀀스)이 들어갈 수 있습니다.
//! 잘못된 규칙은 건너뛰지 않고 로딩 전체를 실패시킵니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::DispatchError;

use super::types::DispatchRule;

/// 규칙 파일 로더 설정
const MAX_RULE_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_RULES_COUNT: usize = 10_000;

/// 규칙 파일 로더
pub struct RuleLoader;

impl RuleLoader {
    /// 경로가 디렉토리면 디렉토리 전체를, 파일이면 해당 파일을 로드합니다.
    pub async fn load_path(path: impl AsRef<Path>) -> Result<Vec<DispatchRule>, DispatchError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| DispatchError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read rule path: {e}"),
            })?;

        if metadata.is_dir() {
            Self::load_directory(path).await
        } else {
            Self::load_file(path).await
        }
    }

    /// 디렉토리에서 모든 YAML 규칙 파일을 로드합니다.
    ///
    /// `.yml` 또는 `.yaml` 확장자를 가진 파일만 파일명 순서로 처리합니다.
    ///
    /// # Errors
    /// - 디렉토리를 읽을 수 없는 경우
    /// - 파일 하나라도 파싱/검증에 실패한 경우
    /// - 규칙 ID가 중복된 경우
    /// - 규칙 수가 `MAX_RULES_COUNT`를 초과하는 경우
    pub async fn load_directory(
        dir: impl AsRef<Path>,
    ) -> Result<Vec<DispatchRule>, DispatchError> {
        let dir = dir.as_ref();

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| DispatchError::RuleLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory: {e}"),
            })?;

        let mut files: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DispatchError::RuleLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory entry: {e}"),
            })?
        {
            let path = entry.path();

            // .yml / .yaml 확장자만 처리
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");

            if is_yaml {
                files.push(path);
            }
        }
        files.sort();

        let mut rules = Vec::new();
        for path in &files {
            rules.extend(Self::load_file(path).await?);

            if rules.len() > MAX_RULES_COUNT {
                return Err(DispatchError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("too many rules: max {MAX_RULES_COUNT}"),
                });
            }
        }

        Self::check_unique_ids(&rules, &dir.display().to_string())?;

        tracing::info!(
            dir = %dir.display(),
            files = files.len(),
            count = rules.len(),
            "loaded dispatch rules"
        );

        Ok(rules)
    }

    /// 단일 YAML 파일에서 규칙을 로드합니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Vec<DispatchRule>, DispatchError> {
        let path = path.as_ref();

        // 파일 크기 검증
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| DispatchError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(DispatchError::RuleLoad {
                path: path.display().to_string(),
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DispatchError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file: {e}"),
            })?;

        let rules = Self::parse_yaml(&content, &path.display().to_string())?;
        tracing::debug!(path = %path.display(), count = rules.len(), "parsed rule file");
        Ok(rules)
    }

    /// YAML 문자열을 파싱하여 규칙 목록을 생성합니다.
    ///
    /// 최상위가 시퀀스면 규칙 목록으로, 매핑이면 규칙 하나로 해석합니다.
    /// `source`는 에러 메시지에 표시될 출처입니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<Vec<DispatchRule>, DispatchError> {
        let parse_err = |e: serde_yaml::Error| DispatchError::RuleLoad {
            path: source.to_owned(),
            reason: format!("YAML parse error: {e}"),
        };

        let document: serde_yaml::Value = serde_yaml::from_str(yaml_str).map_err(parse_err)?;
        let rules: Vec<DispatchRule> = match document {
            serde_yaml::Value::Sequence(_) => serde_yaml::from_value(document).map_err(parse_err)?,
            serde_yaml::Value::Mapping(_) => {
                vec![serde_yaml::from_value(document).map_err(parse_err)?]
            }
            serde_yaml::Value::Null => Vec::new(),
            _ => {
                return Err(DispatchError::RuleLoad {
                    path: source.to_owned(),
                    reason: "expected a rule mapping or a list of rules".to_owned(),
                });
            }
        };

        // 유효성 검증
        for rule in &rules {
            rule.validate()?;
        }
        Self::check_unique_ids(&rules, source)?;

        Ok(rules)
    }

    /// 규칙 ID 중복을 검사합니다.
    pub fn check_unique_ids(rules: &[DispatchRule], source: &str) -> Result<(), DispatchError> {
        let mut seen = HashSet::new();
        for rule in rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(DispatchError::RuleLoad {
                    path: source.to_owned(),
                    reason: format!("duplicate rule id '{}'", rule.id),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF_RULE: &str = r#"
id: pdf_document
title: PDF document
plugins: [pdf]
patterns:
  - modifier: starts_with
    value: "%PDF-"
"#;

    #[test]
    fn parse_single_rule() {
        let rules = RuleLoader::parse_yaml(PDF_RULE, "pdf.yml").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "pdf_document");
        assert_eq!(rules[0].plugins, vec!["pdf"]);
    }

    #[test]
    fn parse_rule_list() {
        let yaml = r#"
- id: zip
  title: ZIP
  plugins: [unzip]
  patterns:
    - modifier: hex
      value: "50 4B 03 04"
- id: pe
  title: PE
  plugins: [pe, strings]
  patterns:
    - modifier: starts_with
      value: "MZ"
"#;
        let rules = RuleLoader::parse_yaml(yaml, "bundle.yml").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].plugins, vec!["pe", "strings"]);
    }

    #[test]
    fn parse_empty_document_yields_no_rules() {
        let rules = RuleLoader::parse_yaml("", "empty.yml").unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn parse_scalar_document_is_error() {
        let err = RuleLoader::parse_yaml("just a string", "scalar.yml").unwrap_err();
        assert!(matches!(err, DispatchError::RuleLoad { .. }));
    }

    #[test]
    fn parse_invalid_yaml_returns_error() {
        let err = RuleLoader::parse_yaml("not: [valid: yaml: {{{", "bad.yml").unwrap_err();
        assert!(err.to_string().contains("bad.yml"));
    }

    #[test]
    fn parse_yaml_with_missing_required_fields() {
        let yaml = r#"
id: no_plugins
title: Missing plugins
patterns:
  - value: "x"
"#;
        let err = RuleLoader::parse_yaml(yaml, "missing.yml").unwrap_err();
        assert!(matches!(err, DispatchError::RuleLoad { .. }));
    }

    #[test]
    fn parse_yaml_runs_validation() {
        let yaml = r#"
id: ""
title: Empty id
plugins: [x]
patterns:
  - value: "x"
"#;
        let err = RuleLoader::parse_yaml(yaml, "empty_id.yml").unwrap_err();
        assert!(matches!(err, DispatchError::RuleValidation { .. }));
    }

    #[test]
    fn duplicate_ids_in_one_file_are_rejected() {
        let yaml = r#"
- id: dup
  title: A
  plugins: [a]
  patterns: [{ value: "a" }]
- id: dup
  title: B
  plugins: [b]
  patterns: [{ value: "b" }]
"#;
        let err = RuleLoader::parse_yaml(yaml, "dup.yml").unwrap_err();
        assert!(err.to_string().contains("duplicate rule id 'dup'"));
    }

    #[tokio::test]
    async fn load_directory_reads_yaml_files_only() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a_pdf.yml"), PDF_RULE)
            .await
            .unwrap();
        tokio::fs::write(
            dir.path().join("b_zip.yaml"),
            "id: zip\ntitle: ZIP\nplugins: [unzip]\npatterns: [{ value: PK }]\n",
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "not a rule")
            .await
            .unwrap();

        let rules = RuleLoader::load_directory(dir.path()).await.unwrap();
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["pdf_document", "zip"]);
    }

    #[tokio::test]
    async fn load_directory_fails_on_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("good.yml"), PDF_RULE)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("bad.yml"), "id: [broken")
            .await
            .unwrap();

        let err = RuleLoader::load_directory(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("bad.yml"));
    }

    #[tokio::test]
    async fn load_directory_rejects_duplicates_across_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("one.yml"), PDF_RULE)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("two.yml"), PDF_RULE)
            .await
            .unwrap();

        let err = RuleLoader::load_directory(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("duplicate rule id"));
    }

    #[tokio::test]
    async fn load_path_accepts_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pdf.yml");
        tokio::fs::write(&file, PDF_RULE).await.unwrap();

        let rules = RuleLoader::load_path(&file).await.unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[tokio::test]
    async fn load_nonexistent_path_returns_error() {
        let err = RuleLoader::load_path("/nonexistent/path/rules")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::RuleLoad { .. }));
    }
}
