/// Login-time startup registration via the `HKCU\...\Run` registry key.
///
/// Registration is opt-in: run the daemon once with `--register-startup` to
/// add it, or `--unregister-startup` to remove it.
///
/// On non-Windows platforms these functions compile and succeed as no-ops, and
/// [`is_startup_registered`] reports `false`.
use anyhow::Result;
use tracing::info;

#[cfg(windows)]
mod imp {
    use anyhow::{bail, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegOpenKeyExW, RegQueryValueExW,
        RegSetValueExW, HKEY, HKEY_CURRENT_USER, KEY_QUERY_VALUE, KEY_SET_VALUE,
        REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
    const VALUE_NAME: &str = "procwatch";

    /// Converts a Rust `&str` to a null-terminated UTF-16 `Vec<u16>`.
    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Writes `exe_path` to `HKCU\...\Run\procwatch`. Overwrites any existing value.
    pub fn register(exe_path: &str) -> Result<()> {
        let key_w = to_wide(RUN_KEY);
        let val_w = to_wide(VALUE_NAME);
        let data_w = to_wide(exe_path);
        let data_bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(data_w.as_ptr() as *const u8, data_w.len() * 2)
        };

        let mut hkey = HKEY::default();
        let err = unsafe {
            RegCreateKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key_w.as_ptr()),
                0,
                PCWSTR::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_SET_VALUE,
                None,
                &mut hkey,
                None,
            )
        };
        if err != ERROR_SUCCESS {
            bail!("RegCreateKeyExW failed: {:?}", err);
        }

        let err = unsafe {
            RegSetValueExW(hkey, PCWSTR::from_raw(val_w.as_ptr()), 0, REG_SZ, Some(data_bytes))
        };
        unsafe {
            let _ = RegCloseKey(hkey);
        }

        if err != ERROR_SUCCESS {
            bail!("RegSetValueExW failed: {:?}", err);
        }
        Ok(())
    }

    /// Removes the `procwatch` value. Succeeds if it is already absent.
    pub fn unregister() -> Result<()> {
        let Some(hkey) = open_run_key(KEY_SET_VALUE) else {
            return Ok(());
        };
        let val_w = to_wide(VALUE_NAME);
        let err = unsafe { RegDeleteValueW(hkey, PCWSTR::from_raw(val_w.as_ptr())) };
        unsafe {
            let _ = RegCloseKey(hkey);
        }

        if err != ERROR_SUCCESS && err != ERROR_FILE_NOT_FOUND {
            bail!("RegDeleteValueW failed: {:?}", err);
        }
        Ok(())
    }

    pub fn is_registered() -> bool {
        let Some(hkey) = open_run_key(KEY_QUERY_VALUE) else {
            return false;
        };
        let val_w = to_wide(VALUE_NAME);
        let err = unsafe {
            RegQueryValueExW(hkey, PCWSTR::from_raw(val_w.as_ptr()), None, None, None, None)
        };
        unsafe {
            let _ = RegCloseKey(hkey);
        }
        err == ERROR_SUCCESS
    }

    fn open_run_key(access: windows::Win32::System::Registry::REG_SAM_FLAGS) -> Option<HKEY> {
        let key_w = to_wide(RUN_KEY);
        let mut hkey = HKEY::default();
        let err = unsafe {
            RegOpenKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key_w.as_ptr()),
                0,
                access,
                &mut hkey,
            )
        };
        (err == ERROR_SUCCESS).then_some(hkey)
    }
}

/// Registers the running daemon binary to launch automatically at user login.
pub fn register_startup() -> Result<()> {
    #[cfg(windows)]
    {
        let exe = std::env::current_exe()
            .map_err(|e| anyhow::anyhow!("Failed to locate daemon executable: {e}"))?;
        let exe_str = exe.to_string_lossy();
        imp::register(&exe_str)?;
        info!(exe = %exe_str, "Registered for login startup");
    }
    #[cfg(not(windows))]
    info!("Login startup registration is only supported on Windows");
    Ok(())
}

/// Removes the daemon from login startup.
pub fn unregister_startup() -> Result<()> {
    #[cfg(windows)]
    {
        imp::unregister()?;
        info!("Removed from login startup");
    }
    #[cfg(not(windows))]
    info!("Login startup registration is only supported on Windows");
    Ok(())
}

pub fn is_startup_registered() -> bool {
    #[cfg(windows)]
    {
        imp::is_registered()
    }
    #[cfg(not(windows))]
    {
        false
    }
}
