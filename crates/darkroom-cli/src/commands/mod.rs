//! CLI command implementations

pub mod bench;
pub mod curve;
pub mod info;

use anyhow::{bail, Context, Result};
use darkroom_compute::{ComputeContext, ContextConfig};
use darkroom_ops::CurvePoint;

/// Builds a context from the environment, optionally CPU-only.
pub fn build_context(cpu: bool) -> ComputeContext {
    let mut config = ContextConfig::from_env();
    if cpu {
        config.init.force_disabled = true;
    }
    ComputeContext::new(config)
}

/// Parses an `x,y` control point.
pub fn parse_point(s: &str) -> Result<CurvePoint> {
    let Some((x, y)) = s.split_once(',') else {
        bail!("expected x,y but got '{s}'");
    };
    let x: f64 = x.trim().parse().with_context(|| format!("bad x in '{s}'"))?;
    let y: f64 = y.trim().parse().with_context(|| format!("bad y in '{s}'"))?;
    if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
        bail!("point '{s}' is outside [0, 1]");
    }
    Ok(CurvePoint::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("0.25, 0.5").unwrap(), CurvePoint::new(0.25, 0.5));
        assert!(parse_point("0.5").is_err());
        assert!(parse_point("a,b").is_err());
        assert!(parse_point("1.5,0").is_err());
    }
}
