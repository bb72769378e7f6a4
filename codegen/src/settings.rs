//! Backend options.

use core::fmt;
use core::str::FromStr;

/// Optimization level requested for a lowering job.
///
/// `O0` runs only the mandatory passes; every other level enables the
/// optimization fixed-point loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptLevel {
    #[default]
    O0,
    O1,
    O2,
    O3,
    Os,
    Oz,
}

impl OptLevel {
    /// Whether the optimization passes run at this level.
    pub fn optimizations_enabled(self) -> bool {
        !matches!(self, OptLevel::O0)
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            OptLevel::O0 => "O0",
            OptLevel::O1 => "O1",
            OptLevel::O2 => "O2",
            OptLevel::O3 => "O3",
            OptLevel::Os => "Os",
            OptLevel::Oz => "Oz",
        };
        f.write_str(s)
    }
}

impl FromStr for OptLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "O0" => Ok(OptLevel::O0),
            "O1" => Ok(OptLevel::O1),
            "O2" => Ok(OptLevel::O2),
            "O3" => Ok(OptLevel::O3),
            "Os" => Ok(OptLevel::Os),
            "Oz" => Ok(OptLevel::Oz),
            _ => Err(()),
        }
    }
}

/// Options accepted by the backend for one module's lowering jobs.
#[derive(Clone, Debug, Default)]
pub struct CodeGenOptions {
    /// Name of the module being lowered, for logging only.
    pub module_name: String,
    pub opt_level: OptLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_level_parsing() {
        assert_eq!("O2".parse(), Ok(OptLevel::O2));
        assert_eq!("Oz".parse(), Ok(OptLevel::Oz));
        assert!("O9".parse::<OptLevel>().is_err());
        assert!(!OptLevel::O0.optimizations_enabled());
        assert!(OptLevel::O1.optimizations_enabled());
    }
}
