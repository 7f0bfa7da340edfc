//! Where the name and seat for a run come from.

use crate::profile::Profile;

/// Name and seat for one run. `persist` asks the caller to save them as the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub name: String,
    pub seat: String,
    pub persist: bool,
}

impl Credentials {
    pub fn profile(&self) -> Profile {
        Profile {
            name: self.name.clone(),
            seat: self.seat.clone(),
        }
    }
}

pub trait CredentialSource {
    /// `Ok(None)` means the user cancelled.
    fn get_name_and_seat(&mut self) -> anyhow::Result<Option<Credentials>>;
}

/// Headless source backed by the saved profile.
pub struct ProfileCredentials {
    profile: Profile,
}

impl ProfileCredentials {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }
}

impl CredentialSource for ProfileCredentials {
    fn get_name_and_seat(&mut self) -> anyhow::Result<Option<Credentials>> {
        Ok(Some(Credentials {
            name: self.profile.name.clone(),
            seat: self.profile.seat.clone(),
            persist: false,
        }))
    }
}

/// Ask `source` for credentials. A source that cannot start (no usable
/// display, GUI backend failure) counts the same as a cancel.
pub fn request(source: &mut dyn CredentialSource) -> Option<Credentials> {
    match source.get_name_and_seat() {
        Ok(creds) => creds,
        Err(e) => {
            tracing::error!(error = %e, "could not collect name and seat");
            None
        }
    }
}

/// Whether a graphical session is reachable.
pub fn display_present(env: &impl Fn(&str) -> Option<String>) -> bool {
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|key| env(key).is_some_and(|v| !v.is_empty()))
}

/// Saved profile first, then the form if a display is available.
pub fn select_source(
    profile: Option<Profile>,
    env: impl Fn(&str) -> Option<String>,
) -> Option<Box<dyn CredentialSource>> {
    if let Some(profile) = profile {
        tracing::info!("using saved profile (headless)");
        return Some(Box::new(ProfileCredentials::new(profile)));
    }

    if !display_present(&env) {
        tracing::debug!("no DISPLAY or WAYLAND_DISPLAY");
        return None;
    }

    form_source()
}

#[cfg(feature = "gui")]
fn form_source() -> Option<Box<dyn CredentialSource>> {
    Some(Box::new(crate::form::FormCredentials::new()))
}

#[cfg(not(feature = "gui"))]
fn form_source() -> Option<Box<dyn CredentialSource>> {
    tracing::debug!("built without the gui feature");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_profile_source_is_not_persisted() {
        let profile = Profile { name: "Jane".into(), seat: "12A".into() };
        let mut source = select_source(Some(profile), no_env).unwrap();
        let creds = source.get_name_and_seat().unwrap().unwrap();
        assert_eq!(creds.name, "Jane");
        assert_eq!(creds.seat, "12A");
        assert!(!creds.persist);
    }

    #[test]
    fn test_no_profile_no_display() {
        assert!(select_source(None, no_env).is_none());
        assert!(select_source(None, |k: &str| (k == "DISPLAY").then(String::new)).is_none());
    }

    #[test]
    fn test_display_detection() {
        assert!(display_present(&|k: &str| (k == "WAYLAND_DISPLAY").then(|| "wayland-0".to_string())));
        assert!(display_present(&|k: &str| (k == "DISPLAY").then(|| ":0".to_string())));
        assert!(!display_present(&no_env));
    }

    #[cfg(feature = "gui")]
    #[test]
    fn test_display_selects_form() {
        assert!(select_source(None, |k: &str| (k == "DISPLAY").then(|| ":0".to_string())).is_some());
    }

    struct BrokenForm;

    impl CredentialSource for BrokenForm {
        fn get_name_and_seat(&mut self) -> anyhow::Result<Option<Credentials>> {
            Err(anyhow::anyhow!("details form failed: no display connection"))
        }
    }

    #[test]
    fn test_failed_source_is_treated_as_cancel() {
        assert!(request(&mut BrokenForm).is_none());
    }

    #[test]
    fn test_request_passes_credentials_through() {
        let mut source = ProfileCredentials::new(Profile { name: "Jane".into(), seat: "12A".into() });
        let creds = request(&mut source).unwrap();
        assert_eq!((creds.name.as_str(), creds.seat.as_str()), ("Jane", "12A"));
    }

    #[test]
    fn test_credentials_to_profile() {
        let creds = Credentials { name: "a".into(), seat: "b".into(), persist: true };
        assert_eq!(creds.profile(), Profile { name: "a".into(), seat: "b".into() });
    }
}
