use anyhow::{Result, bail};

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Parse a storage quantity such as `3Gi`, `500M`, or `1024` into bytes.
/// Binary (`Ki`..`Ei`) and decimal (`k`, `K`, `M`..`E`) suffixes are accepted.
pub fn parse_quantity_bytes(quantity: &str) -> Result<u128> {
    let q = quantity.trim();
    let split = q
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(q.len());
    let (number, suffix) = q.split_at(split);
    if number.is_empty() {
        bail!("invalid quantity '{}'", quantity);
    }
    let multiplier: u128 = match suffix {
        "" => 1,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "Ei" => 1 << 60,
        "k" | "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000,
        other => bail!("invalid quantity suffix '{}' in '{}'", other, quantity),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid quantity '{}'", quantity))?;
    Ok((value * multiplier as f64) as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(validate_name("nginx").is_ok());
        assert!(validate_name("my-app").is_ok());
        assert!(validate_name("app-123").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("a-b-c-d").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("My-App").is_err());
        assert!(validate_name("my_app").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name("special!char").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity_bytes("3Gi").unwrap(), 3 * (1 << 30));
        assert_eq!(parse_quantity_bytes("500M").unwrap(), 500_000_000);
        assert_eq!(parse_quantity_bytes("1024").unwrap(), 1024);
        assert_eq!(parse_quantity_bytes("1.5Gi").unwrap(), 3 * (1 << 29));
        assert!(parse_quantity_bytes("Gi").is_err());
        assert!(parse_quantity_bytes("3Gb").is_err());
        assert!(parse_quantity_bytes("").is_err());
    }
}
