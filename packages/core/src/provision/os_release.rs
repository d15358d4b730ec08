//! Guest OS identification

use super::ProvisionError;

/// Fields of `/etc/os-release` the provisioners care about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    /// Lower-cased `ID` (e.g. "ubuntu", "fedora", "boot2podman")
    pub id: String,
    /// Lower-cased `ID_LIKE` entries
    pub id_like: Vec<String>,
    pub name: String,
    pub pretty_name: String,
    pub version_id: Option<String>,
}

impl OsRelease {
    /// Parse os-release `KEY=value` content
    pub fn parse(content: &str) -> Result<Self, ProvisionError> {
        let mut release = OsRelease::default();

        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                match key {
                    "ID" => release.id = value.to_lowercase(),
                    "ID_LIKE" => {
                        release.id_like = value
                            .split_whitespace()
                            .map(str::to_lowercase)
                            .collect()
                    }
                    "NAME" => release.name = value.to_string(),
                    "PRETTY_NAME" => release.pretty_name = value.to_string(),
                    "VERSION_ID" => release.version_id = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        if release.id.is_empty() {
            return Err(ProvisionError::OsRelease(
                "no ID in /etc/os-release".to_string(),
            ));
        }
        Ok(release)
    }

    /// True if `ID`, or failing that one of `ID_LIKE`, is in `ids`
    pub fn matches(&self, ids: &[&str]) -> bool {
        ids.contains(&self.id.as_str())
    }

    pub fn is_like(&self, ids: &[&str]) -> bool {
        self.matches(ids) || self.id_like.iter().any(|like| ids.contains(&like.as_str()))
    }

    pub fn display_name(&self) -> &str {
        if self.pretty_name.is_empty() {
            &self.id
        } else {
            &self.pretty_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ubuntu() {
        let content = r#"NAME="Ubuntu"
VERSION="22.04.3 LTS (Jammy Jellyfish)"
ID=ubuntu
ID_LIKE=debian
PRETTY_NAME="Ubuntu 22.04.3 LTS"
VERSION_ID="22.04"
"#;
        let release = OsRelease::parse(content).unwrap();
        assert_eq!(release.id, "ubuntu");
        assert_eq!(release.id_like, vec!["debian"]);
        assert_eq!(release.pretty_name, "Ubuntu 22.04.3 LTS");
        assert_eq!(release.version_id.as_deref(), Some("22.04"));
        assert!(release.matches(&["debian", "ubuntu"]));
    }

    #[test]
    fn test_parse_boot2podman() {
        let content = "NAME=Boot2Podman\nVERSION=0.7\nID=boot2podman\nID_LIKE=tcl\nVERSION_ID=0.7\n";
        let release = OsRelease::parse(content).unwrap();
        assert_eq!(release.id, "boot2podman");
        assert_eq!(release.display_name(), "boot2podman");
    }

    #[test]
    fn test_id_like_fallback() {
        let content = "ID=rocky\nID_LIKE=\"rhel centos fedora\"\n";
        let release = OsRelease::parse(content).unwrap();
        assert!(!release.matches(&["rhel"]));
        assert!(release.is_like(&["rhel"]));
    }

    #[test]
    fn test_missing_id() {
        let result = OsRelease::parse("NAME=Mystery\n# ID=commented\n");
        assert!(matches!(result, Err(ProvisionError::OsRelease(_))));
    }
}
