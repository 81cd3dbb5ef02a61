//! `--list-windows` support: a capability trait plus a minimal default
//! implementation. A full OS-backed accessibility/X11/Win32 enumerator is
//! explicitly out of scope; this exists so the CLI flag is runnable and so
//! a platform-specific enumerator can be dropped in behind the trait later.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowDescriptor {
    pub title: String,
    pub class: Option<String>,
}

pub trait WindowEnumerator: Send + Sync {
    fn enumerate(&self) -> Vec<WindowDescriptor>;
}

/// Always reports no windows. Standing in for a host-OS enumerator until
/// one exists behind this trait.
#[derive(Debug, Default)]
pub struct NullWindowEnumerator;

impl WindowEnumerator for NullWindowEnumerator {
    fn enumerate(&self) -> Vec<WindowDescriptor> {
        Vec::new()
    }
}

pub fn format_window_list(windows: &[WindowDescriptor]) -> String {
    windows
        .iter()
        .map(|window| format!("{}\t{}", window.title, window.class.as_deref().unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_enumerator_reports_nothing() {
        let enumerator = NullWindowEnumerator;
        assert!(enumerator.enumerate().is_empty());
    }

    #[test]
    fn format_empty_list() {
        assert_eq!(format_window_list(&[]), "");
    }

    #[test]
    fn format_list_with_and_without_class() {
        let windows = vec![
            WindowDescriptor {
                title: "Terminal".into(),
                class: Some("xterm".into()),
            },
            WindowDescriptor {
                title: "Untitled".into(),
                class: None,
            },
        ];
        let formatted = format_window_list(&windows);
        assert_eq!(formatted, "Terminal\txterm\nUntitled\t");
    }
}
