use crate::error::PsbtError;

/// nLockTime values at or above this are unix timestamps (BIP113).
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Lock requirements declared by one input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockRequirement {
    pub time: Option<u32>,
    pub height: Option<u32>,
}

/// Pick the transaction nLockTime from per-input requirements.
///
/// Heights win when every input declares one or when they outnumber time
/// requirements; times win only when strictly more numerous. A tie between
/// the two is an error.
pub fn resolve_locktime(requirements: &[LockRequirement], fallback: Option<u32>) -> Result<u32, PsbtError> {
    let heights: Vec<u32> = requirements.iter().filter_map(|r| r.height).collect();
    let times: Vec<u32> = requirements.iter().filter_map(|r| r.time).collect();

    if heights.is_empty() && times.is_empty() {
        return Ok(fallback.unwrap_or(0));
    }
    if heights.len() == requirements.len() || heights.len() > times.len() {
        return heights.into_iter().max().ok_or(PsbtError::IndeterminateLocktime);
    }
    if times.len() > heights.len() {
        return times.into_iter().max().ok_or(PsbtError::IndeterminateLocktime);
    }
    Err(PsbtError::IndeterminateLocktime)
}

pub fn check_time_locktime(value: u32) -> Result<(), PsbtError> {
    if value < LOCKTIME_THRESHOLD {
        return Err(PsbtError::InvalidState(format!(
            "time locktime {value} is below {LOCKTIME_THRESHOLD}"
        )));
    }
    Ok(())
}

pub fn check_height_locktime(value: u32) -> Result<(), PsbtError> {
    if value >= LOCKTIME_THRESHOLD {
        return Err(PsbtError::InvalidState(format!(
            "height locktime {value} is not below {LOCKTIME_THRESHOLD}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: LockRequirement = LockRequirement { time: None, height: None };

    fn height(h: u32) -> LockRequirement {
        LockRequirement { time: None, height: Some(h) }
    }

    fn time(t: u32) -> LockRequirement {
        LockRequirement { time: Some(t), height: None }
    }

    #[test]
    fn no_requirements_uses_fallback() {
        assert_eq!(resolve_locktime(&[NONE, NONE], Some(700_000)).unwrap(), 700_000);
        assert_eq!(resolve_locktime(&[NONE], None).unwrap(), 0);
        assert_eq!(resolve_locktime(&[], None).unwrap(), 0);
    }

    #[test]
    fn heights_outnumbering_win() {
        let reqs = [height(800_000), height(800_010), NONE];
        assert_eq!(resolve_locktime(&reqs, Some(1)).unwrap(), 800_010);
    }

    #[test]
    fn single_time_requirement_wins() {
        let reqs = [time(1_700_000_000), NONE];
        assert_eq!(resolve_locktime(&reqs, None).unwrap(), 1_700_000_000);
    }

    #[test]
    fn every_input_with_height_beats_times() {
        let both = LockRequirement { time: Some(1_700_000_000), height: Some(800_000) };
        assert_eq!(resolve_locktime(&[both, height(800_005)], None).unwrap(), 800_005);
    }

    #[test]
    fn tie_is_indeterminate() {
        let err = resolve_locktime(&[height(800_000), time(1_700_000_000)], None).unwrap_err();
        assert!(matches!(err, PsbtError::IndeterminateLocktime));
    }

    #[test]
    fn threshold_boundaries() {
        assert!(check_time_locktime(LOCKTIME_THRESHOLD).is_ok());
        assert!(check_time_locktime(LOCKTIME_THRESHOLD - 1).is_err());
        assert!(check_height_locktime(LOCKTIME_THRESHOLD - 1).is_ok());
        assert!(check_height_locktime(LOCKTIME_THRESHOLD).is_err());
    }
}
