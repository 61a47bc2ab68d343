use anyhow::{Result, bail};

/// Validate an object name against DNS-1123 subdomain rules.
/// Rules: lowercase `[a-z0-9.-]`, max 253 chars, must start and end alphanumeric.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 253 {
        bail!("name '{}' exceeds 253 characters (got {})", name, name.len());
    }
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !name.starts_with(alnum) || !name.ends_with(alnum) {
        bail!("name '{}' must start and end with a lowercase letter or digit", name);
    }
    if !name.chars().all(|c| alnum(c) || c == '-' || c == '.') {
        bail!(
            "name '{}' must contain only lowercase letters, digits, '-' and '.'",
            name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(validate_name("nginx").is_ok());
        assert!(validate_name("my-app").is_ok());
        assert!(validate_name("imported-0a1b2c3d4e").is_ok());
        assert!(validate_name("cluster.clusterset.k8s.io").is_ok());
        assert!(validate_name("a").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("My-App").is_err());
        assert!(validate_name("my_app").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing.").is_err());
        assert!(validate_name(&"a".repeat(254)).is_err());
    }
}
