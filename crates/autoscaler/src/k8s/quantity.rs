//! Conversion of Kubernetes resource quantities into integer units.

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::k8s::KubernetesError;

/// Parses a CPU quantity ("250m", "1", "0.5", "100n") into millicores.
pub fn cpu_millicores(quantity: &Quantity) -> Result<u64, Report<KubernetesError>> {
    let cores = parse_quantity(&quantity.0)?;
    Ok((cores * 1000.0).round() as u64)
}

/// Parses a memory quantity ("128Mi", "1G", "1e9", "512") into bytes.
pub fn memory_bytes(quantity: &Quantity) -> Result<u64, Report<KubernetesError>> {
    let bytes = parse_quantity(&quantity.0)?;
    Ok(bytes.round() as u64)
}

/// Parses a quantity string into a value in base units.
fn parse_quantity(value: &str) -> Result<f64, Report<KubernetesError>> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Report::new(KubernetesError::QuantityParseError {
            message: "empty quantity".to_string(),
        }));
    }

    // Decimal exponent form, e.g. "1e3" or "1.5E6"
    if let Some(pos) = value.find(|c: char| c == 'e' || c == 'E') {
        let (mantissa, exponent) = (&value[..pos], &value[pos + 1..]);
        if !mantissa.is_empty() && exponent.parse::<i32>().is_ok() {
            return value
                .parse::<f64>()
                .change_context(KubernetesError::QuantityParseError {
                    message: format!("Invalid exponent quantity: {value}"),
                });
        }
    }

    let split = value
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(value.len());
    let (numeric_part, suffix) = value.split_at(split);

    let number = numeric_part
        .parse::<f64>()
        .change_context(KubernetesError::QuantityParseError {
            message: format!("Invalid numeric part in quantity: {value}"),
        })?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        _ => {
            return Err(Report::new(KubernetesError::QuantityParseError {
                message: format!("Unsupported quantity suffix: {suffix}"),
            }));
        }
    };

    Ok(number * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn cpu_millicores_suffixes() {
        assert_eq!(cpu_millicores(&q("250m")).unwrap(), 250);
        assert_eq!(cpu_millicores(&q("2")).unwrap(), 2000);
        assert_eq!(cpu_millicores(&q("0.5")).unwrap(), 500);
        assert_eq!(cpu_millicores(&q("2000000n")).unwrap(), 2);
    }

    #[test]
    fn memory_bytes_binary_and_decimal_suffixes() {
        assert_eq!(memory_bytes(&q("1Ki")).unwrap(), 1024);
        assert_eq!(memory_bytes(&q("128Mi")).unwrap(), 128 * 1024 * 1024);
        assert_eq!(memory_bytes(&q("2Gi")).unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(memory_bytes(&q("1k")).unwrap(), 1000);
        assert_eq!(memory_bytes(&q("1G")).unwrap(), 1_000_000_000);
        assert_eq!(memory_bytes(&q("512")).unwrap(), 512);
    }

    #[test]
    fn exponent_notation() {
        assert_eq!(memory_bytes(&q("1e3")).unwrap(), 1000);
        assert_eq!(memory_bytes(&q("1.5E6")).unwrap(), 1_500_000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(memory_bytes(&q("")).is_err());
        assert!(memory_bytes(&q("lots")).is_err());
        assert!(memory_bytes(&q("12Zi")).is_err());
    }
}
