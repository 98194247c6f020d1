/// How far the device got in registering with the cloud
///
/// Derived from which of the messenger's required connection parameters
/// are present. Parameters are fed back by the provisioning step, so a
/// fresh device starts `Unregistered` and becomes `Registered` on a later
/// run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationState {
    /// None of the required parameters are present
    Unregistered,
    /// Some but not all required parameters are present
    PartiallyRegistered,
    /// All required parameters are present
    Registered,
}

impl RegistrationState {
    pub fn from_presence(present: &[bool]) -> Self {
        let count = present.iter().filter(|p| **p).count();
        match count {
            0 => RegistrationState::Unregistered,
            n if n == present.len() => RegistrationState::Registered,
            _ => RegistrationState::PartiallyRegistered,
        }
    }
}

/// Who is responsible for ordering connect and subscribe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sequencing {
    /// Subscriptions can be requested before the connection is up
    SelfSequencing,
    /// The caller must wait for the connection before subscribing
    CallerSequenced,
}

/// Blank values count as missing
pub(crate) fn is_present(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}
