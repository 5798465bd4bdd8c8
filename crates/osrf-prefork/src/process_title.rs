//! Sets the externally-visible process title (as seen in `ps`/`top`) so an
//! operator can tell the listener apart from its drones at a glance.
//!
//! Title wording is an external-interface contract: operational tooling
//! greps for these exact strings, so they must not drift.

/// Set the parent's title: `OpenSRF Listener [<app>]`.
pub fn set_listener_title(app_name: &str) {
    set_title(&format!("OpenSRF Listener [{app_name}]"));
}

/// Set a worker's title after it has finished initializing:
/// `OpenSRF Drone [<app>]`.
pub fn set_drone_title(app_name: &str) {
    set_title(&format!("OpenSRF Drone [{app_name}]"));
}

/// Best-effort; a title that fails to set has no effect on correctness.
#[cfg(target_os = "linux")]
fn set_title(title: &str) {
    use std::ffi::CString;

    let Ok(name) = CString::new(title.as_bytes().iter().take(15).copied().collect::<Vec<u8>>())
    else {
        return;
    };
    // PR_SET_NAME truncates to 15 bytes plus the trailing NUL; the kernel
    // reads this back for `ps`'s comm column.
    let rc = unsafe { nix::libc::prctl(nix::libc::PR_SET_NAME, name.as_ptr(), 0, 0, 0) };
    if rc != 0 {
        tracing::debug!(%title, "failed to set process title");
    }
}

#[cfg(not(target_os = "linux"))]
fn set_title(title: &str) {
    tracing::debug!(%title, "process title setting is not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_match_the_documented_format() {
        let listener = format!("OpenSRF Listener [{}]", "opensrf.math");
        let drone = format!("OpenSRF Drone [{}]", "opensrf.math");
        assert_eq!(listener, "OpenSRF Listener [opensrf.math]");
        assert_eq!(drone, "OpenSRF Drone [opensrf.math]");
        set_listener_title("opensrf.math");
        set_drone_title("opensrf.math");
    }
}
