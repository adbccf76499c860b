//! LOD command - print the level of detail for a zoom.

use footsteps::lod::{LodSelector, DEFAULT_BREAKPOINTS};

use crate::error::CliError;

/// Run the lod command.
pub fn run(zoom: f64) -> Result<(), CliError> {
    if !zoom.is_finite() {
        return Err(CliError::InvalidTile(format!("zoom must be finite, got {}", zoom)));
    }
    let lod = LodSelector::new(DEFAULT_BREAKPOINTS).select(zoom);
    println!("zoom {} → lod {} ({})", zoom, lod.level(), lod.name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_finite_zoom() {
        assert!(matches!(run(f64::NAN), Err(CliError::InvalidTile(_))));
        assert!(run(5.5).is_ok());
    }
}
