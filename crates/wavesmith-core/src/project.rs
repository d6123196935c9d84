use std::path::Path;

use serde::{Deserialize, Serialize};

/// Build tool inferred from marker files in the project root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildTool {
    Gradle,
    Maven,
    Npm,
    Cargo,
}

impl BuildTool {
    pub fn verify_command(&self) -> &'static str {
        match self {
            BuildTool::Gradle => "./gradlew test",
            BuildTool::Maven => "mvn test",
            BuildTool::Npm => "npm test",
            BuildTool::Cargo => "cargo test",
        }
    }
}

/// Marker files in probe order; the first one present wins.
const MARKERS: [(&str, BuildTool); 5] = [
    ("build.gradle", BuildTool::Gradle),
    ("build.gradle.kts", BuildTool::Gradle),
    ("pom.xml", BuildTool::Maven),
    ("package.json", BuildTool::Npm),
    ("Cargo.toml", BuildTool::Cargo),
];

pub fn detect_build_tool(root: &Path) -> Option<BuildTool> {
    MARKERS
        .iter()
        .find(|(marker, _)| root.join(marker).is_file())
        .map(|(_, tool)| *tool)
}

/// Command each worker runs after implementing its layer.
pub fn detect_verify_command(root: &Path) -> Option<String> {
    detect_build_tool(root).map(|tool| tool.verify_command().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_detected_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_verify_command(dir.path()), None);
    }

    #[test]
    fn gradle_beats_npm() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::write(dir.path().join("build.gradle.kts"), "").unwrap();
        assert_eq!(detect_build_tool(dir.path()), Some(BuildTool::Gradle));
        assert_eq!(detect_verify_command(dir.path()).as_deref(), Some("./gradlew test"));
    }

    #[test]
    fn maven_and_npm() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_verify_command(dir.path()).as_deref(), Some("npm test"));
        std::fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
        assert_eq!(detect_verify_command(dir.path()).as_deref(), Some("mvn test"));
    }
}
