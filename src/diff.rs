use std::fmt::{self, Display, Formatter};

use crate::record::{CurrentRecord, DesiredRecord};

/// What has to happen at the provider for a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoChange,
    Create(DesiredRecord),
    Replace(CurrentRecord, DesiredRecord),
}

impl Decision {
    pub fn is_change(&self) -> bool {
        !matches!(self, Decision::NoChange)
    }

    pub fn current(&self) -> Option<&CurrentRecord> {
        match self {
            Decision::Replace(current, _) => Some(current),
            _ => None,
        }
    }
}

impl Display for Decision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Decision::NoChange => f.write_str("no-change"),
            Decision::Create(_) => f.write_str("create"),
            Decision::Replace(..) => f.write_str("replace"),
        }
    }
}

/// Compares the provider's record for a name against the desired one.
///
/// The name is the lookup key and is not compared here. Proxying is not compared either,
/// since not every provider reports it.
pub fn decide(current: Option<&CurrentRecord>, desired: &DesiredRecord) -> Decision {
    match current {
        None => Decision::Create(desired.clone()),
        Some(current)
            if current.content == desired.content
                && current.ttl == desired.ttl
                && current.record_type == desired.record_type =>
        {
            Decision::NoChange
        }
        Some(current) => Decision::Replace(current.clone(), desired.clone()),
    }
}
