//! Fleet simulation scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// FLT-001: Vehicles loop well inside the fence
    Patrol,

    /// FLT-002: One vehicle drives out past the fence and back
    Breakout,

    /// FLT-003: A vehicle speeds up past the limit, slows, speeds up again
    Speeding,

    /// FLT-004: Telemetry with null and non-numeric coordinates
    GlitchyTelemetry,

    /// FLT-005: Operator shuts a vehicle off and later restores it
    ShutdownDrill,

    /// FLT-006: Command writes rejected at random, retried by the operator
    FlakyUplink,
}

impl ScenarioId {
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Patrol,
            ScenarioId::Breakout,
            ScenarioId::Speeding,
            ScenarioId::GlitchyTelemetry,
            ScenarioId::ShutdownDrill,
            ScenarioId::FlakyUplink,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Patrol => "patrol",
            ScenarioId::Breakout => "breakout",
            ScenarioId::Speeding => "speeding",
            ScenarioId::GlitchyTelemetry => "glitchy_telemetry",
            ScenarioId::ShutdownDrill => "shutdown_drill",
            ScenarioId::FlakyUplink => "flaky_uplink",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Patrol => "Vehicles loop inside the fence below the limit, expect no alerts",
            ScenarioId::Breakout => "One vehicle leaves the fence and returns, expect one exit and one entry",
            ScenarioId::Speeding => "Cruise speed crosses the limit twice, expect two speed alerts",
            ScenarioId::GlitchyTelemetry => "20% of telemetry pushes carry garbage coordinates, expect them skipped",
            ScenarioId::ShutdownDrill => "SHUT_OFF then RESTORE one vehicle, expect the engine to follow",
            ScenarioId::FlakyUplink => "40% of command writes fail, expect retries to land every command",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "patrol" | "flt-001" => Ok(ScenarioId::Patrol),
            "breakout" | "flt-002" => Ok(ScenarioId::Breakout),
            "speeding" | "flt-003" => Ok(ScenarioId::Speeding),
            "glitchy_telemetry" | "glitchytelemetry" | "flt-004" => Ok(ScenarioId::GlitchyTelemetry),
            "shutdown_drill" | "shutdowndrill" | "flt-005" => Ok(ScenarioId::ShutdownDrill),
            "flaky_uplink" | "flakyuplink" | "flt-006" => Ok(ScenarioId::FlakyUplink),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("FLT-004".parse::<ScenarioId>(), Ok(ScenarioId::GlitchyTelemetry));
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }
}
