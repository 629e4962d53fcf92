/// Wall-clock time of a run: `850ms`, `12.4s`, `3m05s` or `1h02m`
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        return format!("{:.0}ms", secs * 1000.0);
    }
    if secs < 60.0 {
        return format!("{:.1}s", secs);
    }

    let whole = secs.round() as u64;
    if whole < 3600 {
        format!("{}m{:02}s", whole / 60, whole % 60)
    } else {
        format!("{}h{:02}m", whole / 3600, (whole % 3600) / 60)
    }
}

/// Format number with commas
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

/// Argument checks shared by the command-line front end
pub mod validation {
    use anyhow::{bail, Result};

    /// Validate that value lies in `[min, max]`; NaN never does
    pub fn in_range<T: PartialOrd + std::fmt::Display>(value: T, min: T, max: T, name: &str) -> Result<()> {
        if !(&min..=&max).contains(&&value) {
            bail!("{} must be between {} and {}, got {}", name, min, max, value);
        }
        Ok(())
    }

    /// Validate that value is positive
    pub fn positive<T: PartialOrd + Default + std::fmt::Display>(value: T, name: &str) -> Result<()> {
        if value <= T::default() {
            bail!("{} must be positive, got {}", name, value);
        }
        Ok(())
    }
}
