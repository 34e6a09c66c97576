//! C ABI for the tunlink control bridge
//!
//! Exposes the bridge to non-Rust hosts (GUI shells, Electron apps)
//! through a flat function surface. Every control function returns a
//! freshly allocated, caller-owned JSON string; the caller frees it with
//! [`tunlink_release`]. No call panics across the boundary and all
//! functions are safe to invoke from any thread.
//!
//! ```c
//! tunlink_configure("/etc/tunlink/bridge.toml");
//! char *resp = tunlink_start("{\"server\":\"1.2.3.4\"}");
//! /* ... parse {"code":0,"message":"ok"} ... */
//! tunlink_release(resp);
//! ```

use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::{Arc, OnceLock};

use tunlink_bridge::{
    BridgeConfig, CanonicalState, Error, ServiceResponse, StateObserver, TunnelBridge,
};

/// Config file path set by `tunlink_configure` before first use
static CONFIG_PATH: OnceLock<String> = OnceLock::new();

/// The bridge is constructed lazily on the first control call and lives
/// for the rest of the process. Construction failure is remembered so
/// every subsequent call reports the same error instead of retrying.
static BRIDGE: OnceLock<Result<TunnelBridge, String>> = OnceLock::new();

fn bridge() -> Result<&'static TunnelBridge, ServiceResponse> {
    let slot = BRIDGE.get_or_init(|| {
        let config = match CONFIG_PATH.get() {
            Some(path) => BridgeConfig::load(path).map_err(|e| e.to_string())?,
            None => BridgeConfig::default(),
        };
        TunnelBridge::new(config).map_err(|e| e.to_string())
    });
    match slot {
        Ok(bridge) => Ok(bridge),
        Err(message) => Err(ServiceResponse::err(
            -1,
            format!("bridge initialization failed: {message}"),
        )),
    }
}

/// Hand a response to the caller as an owned C string
fn into_c_string(response: ServiceResponse) -> *mut c_char {
    let json = response.to_json();
    match CString::new(json) {
        Ok(s) => s.into_raw(),
        // A NUL can only come from the extension's payload; degrade to a
        // fixed envelope rather than returning null.
        Err(_) => {
            let fallback = r#"{"code":-1,"message":"response contained NUL"}"#;
            match CString::new(fallback) {
                Ok(s) => s.into_raw(),
                Err(_) => std::ptr::null_mut(),
            }
        }
    }
}

/// Read an optional NUL-terminated UTF-8 argument
///
/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn opt_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Set the bridge configuration file path.
///
/// Must be called before the first control function; once the bridge has
/// initialized the path is fixed. Returns 0 on success, -1 if `path` is
/// not valid UTF-8 or the bridge is already initialized.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tunlink_configure(path: *const c_char) -> i32 {
    if BRIDGE.get().is_some() {
        log::warn!("tunlink_configure called after bridge initialization");
        return -1;
    }
    let Some(path) = opt_str(path) else {
        return -1;
    };
    match CONFIG_PATH.set(path.to_string()) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Ensure the tunnel profile exists and is enabled
#[no_mangle]
pub extern "C" fn tunlink_install() -> *mut c_char {
    let response = match bridge() {
        Ok(bridge) => bridge.install(),
        Err(resp) => resp,
    };
    into_c_string(response)
}

/// Start the tunnel with an optional JSON configuration.
///
/// A null or empty `config` reuses the profile's last-persisted
/// configuration. A non-UTF-8 `config` is rejected, never silently
/// replaced by the persisted one.
///
/// # Safety
/// `config` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tunlink_start(config: *const c_char) -> *mut c_char {
    let config = if config.is_null() {
        None
    } else {
        match CStr::from_ptr(config).to_str() {
            Ok(s) => Some(s),
            Err(_) => {
                return into_c_string(ServiceResponse::from(Error::ConfigInvalid(
                    "not valid UTF-8".into(),
                )))
            }
        }
    };
    let response = match bridge() {
        Ok(bridge) => bridge.start(config),
        Err(resp) => resp,
    };
    into_c_string(response)
}

/// Stop the tunnel
#[no_mangle]
pub extern "C" fn tunlink_stop() -> *mut c_char {
    let response = match bridge() {
        Ok(bridge) => bridge.stop(),
        Err(resp) => resp,
    };
    into_c_string(response)
}

/// Query tunnel status; always resolves within the configured bound
#[no_mangle]
pub extern "C" fn tunlink_status() -> *mut c_char {
    let response = match bridge() {
        Ok(bridge) => bridge.status(),
        Err(resp) => resp,
    };
    into_c_string(response)
}

/// Remove and recreate the tunnel profile
#[no_mangle]
pub extern "C" fn tunlink_reinstall() -> *mut c_char {
    let response = match bridge() {
        Ok(bridge) => bridge.reinstall(),
        Err(resp) => resp,
    };
    into_c_string(response)
}

/// State callback invoked with a canonical state string and the caller's
/// context pointer. The string is only valid for the duration of the
/// call.
pub type StateCallback = extern "C" fn(state: *const c_char, ctx: *mut c_void);

struct CCallback {
    cb: StateCallback,
    // Opaque caller-owned pointer, never dereferenced on this side.
    ctx: usize,
}

// The caller guarantees its context is safe to use from any thread, as
// is conventional for context-pointer callback APIs.
unsafe impl Send for CCallback {}
unsafe impl Sync for CCallback {}

impl StateObserver for CCallback {
    fn on_state(&self, state: CanonicalState) {
        // Canonical state strings never contain NUL.
        if let Ok(s) = CString::new(state.as_str()) {
            (self.cb)(s.as_ptr(), self.ctx as *mut c_void)
        }
    }
}

/// Register the state change callback; a null `cb` unregisters.
///
/// Replaces any previously registered callback atomically. If the bridge
/// failed to initialize the registration is ignored; the next control
/// call reports the failure.
#[no_mangle]
pub extern "C" fn tunlink_set_state_callback(cb: Option<StateCallback>, ctx: *mut c_void) {
    let bridge = match bridge() {
        Ok(bridge) => bridge,
        Err(_) => {
            log::warn!("state callback registration ignored: bridge failed to initialize");
            return;
        }
    };
    let observer: Option<Arc<dyn StateObserver>> = cb.map(|cb| {
        Arc::new(CCallback {
            cb,
            ctx: ctx as usize,
        }) as Arc<dyn StateObserver>
    });
    bridge.set_state_callback(observer);
}

/// Free a string returned by any tunlink control function.
///
/// A null pointer is a no-op.
///
/// # Safety
/// `ptr` must be null or a pointer previously returned by a tunlink
/// control function, released at most once.
#[no_mangle]
pub unsafe extern "C" fn tunlink_release(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    drop(CString::from_raw(ptr));
}
