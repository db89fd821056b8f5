//! Runtime dlopen adapter for the vendor FOCAS shared library
//! (`libfwlib32.so` / `Fwlib32.dll`), gated behind the `focas` feature.
//!
//! The library's symbols are C functions taking/returning raw handles and
//! structs (`cnc_allclibhndl3`, `cnc_freelibhndl`, `cnc_statinfo`,
//! `cnc_rdprgnum`, `cnc_startupprocess`, ...). We never link against it at
//! build time — `libloading` resolves the symbols at runtime from a path
//! supplied by configuration, so the daemon can build and run in
//! environments without the vendor SDK installed (see
//! [`super::simulated::SimulatedClient`] for that path).
//!
//! Every call is dispatched through [`tokio::task::spawn_blocking`]: the
//! library is a blocking C library with no notion of async cancellation, so
//! the only way to bound its wall time from our side is the hard-timeout
//! race in [`cnc_broker_core::Connector`], which wraps the whole future
//! (including this blocking hop) in `tokio::time::timeout`.

use std::ffi::c_long;
use std::sync::Arc;

use async_trait::async_trait;
use cnc_broker_core::{ConnectParams, MachineState, NativeClient, NativeHandle, Snapshot};
use libloading::{Library, Symbol};
use tokio::sync::Mutex;

type CncAllcLibHndl3 = unsafe extern "C" fn(*const i8, u16, c_long, *mut c_long) -> i16;
type CncFreeLibHndl = unsafe extern "C" fn(c_long) -> i16;
type CncStatInfo = unsafe extern "C" fn(c_long, *mut i32) -> i16;
type CncRdPrgNum = unsafe extern "C" fn(c_long, *mut i32, *mut i32, *mut i32) -> i16;
type CncStartUpProcess = unsafe extern "C" fn(i32, *const i8) -> i16;
type CncExitProcess = unsafe extern "C" fn() -> i16;

/// Wraps the dlopen'd shared library and its resolved symbols. Opening the
/// library is the one-time process-wide step; `connect` then dials a
/// specific controller through `cnc_allclibhndl3`.
pub struct FocasClient {
    lib: Arc<Library>,
    startup_done: Mutex<bool>,
}

impl FocasClient {
    /// # Safety contract
    /// `lib_path` must point at a FOCAS-compatible shared object matching
    /// the host's ABI; loading an unrelated library is undefined behavior
    /// the moment we call through a resolved symbol.
    pub fn load(lib_path: &str) -> anyhow::Result<Self> {
        let lib = unsafe { Library::new(lib_path)? };
        Ok(Self {
            lib: Arc::new(lib),
            startup_done: Mutex::new(false),
        })
    }
}

#[async_trait]
impl NativeClient for FocasClient {
    async fn startup(&self, log_mode: &str, log_path: &str) -> anyhow::Result<()> {
        let mut done = self.startup_done.lock().await;
        if *done {
            return Ok(());
        }

        let lib = self.lib.clone();
        let log_mode: i32 = log_mode.parse().unwrap_or(0);
        let log_path = std::ffi::CString::new(log_path)?;

        let result = tokio::task::spawn_blocking(move || unsafe {
            let sym: Symbol<CncStartUpProcess> = lib.get(b"cnc_startupprocess\0")?;
            Ok::<i16, anyhow::Error>(sym(log_mode, log_path.as_ptr()))
        })
        .await??;

        if result != 0 {
            anyhow::bail!("cnc_startupprocess failed with code {result}");
        }
        *done = true;
        Ok(())
    }

    async fn connect(&self, params: ConnectParams<'_>) -> anyhow::Result<Box<dyn NativeHandle>> {
        let lib = self.lib.clone();
        let host = std::ffi::CString::new(params.host)?;
        let port = params.port;
        let timeout_ms = params.timeout_ms as c_long;

        let handle: c_long = tokio::task::spawn_blocking(move || unsafe {
            let sym: Symbol<CncAllcLibHndl3> = lib.get(b"cnc_allclibhndl3\0")?;
            let mut out: c_long = 0;
            let rc = sym(host.as_ptr(), port, timeout_ms, &mut out);
            if rc != 0 {
                anyhow::bail!("cnc_allclibhndl3 failed with code {rc}");
            }
            Ok::<c_long, anyhow::Error>(out)
        })
        .await??;

        Ok(Box::new(FocasHandle {
            lib: self.lib.clone(),
            handle,
        }))
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        let mut done = self.startup_done.lock().await;
        if !*done {
            return Ok(());
        }

        let lib = self.lib.clone();
        let result = tokio::task::spawn_blocking(move || unsafe {
            let sym: Symbol<CncExitProcess> = lib.get(b"cnc_exitprocess\0")?;
            Ok::<i16, anyhow::Error>(sym())
        })
        .await??;

        if result != 0 {
            anyhow::bail!("cnc_exitprocess failed with code {result}");
        }
        *done = false;
        Ok(())
    }
}

struct FocasHandle {
    lib: Arc<Library>,
    handle: c_long,
}

impl std::fmt::Debug for FocasHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocasHandle").field("handle", &self.handle).finish()
    }
}

#[async_trait]
impl NativeHandle for FocasHandle {
    async fn get_machine_state(&self) -> anyhow::Result<MachineState> {
        let lib = self.lib.clone();
        let handle = self.handle;
        let status = tokio::task::spawn_blocking(move || unsafe {
            let sym: Symbol<CncStatInfo> = lib.get(b"cnc_statinfo\0")?;
            let mut status: i32 = 0;
            let rc = sym(handle, &mut status);
            if rc != 0 {
                anyhow::bail!("cnc_statinfo failed with code {rc}");
            }
            Ok::<i32, anyhow::Error>(status)
        })
        .await??;

        Ok(MachineState(serde_json::json!({"run_status": status})))
    }

    async fn get_current_data(&self) -> anyhow::Result<Snapshot> {
        // The real aggregate-snapshot read combines several FOCAS calls
        // (statinfo, rdspeed, rdexecprog, ...); omitted here since their
        // exact struct layouts are vendor/model-specific and out of this
        // service's concern — it forwards whatever the vendor call yields.
        self.get_machine_state().await.map(|s| Snapshot(s.0))
    }

    async fn get_control_program(&self) -> anyhow::Result<String> {
        let lib = self.lib.clone();
        let handle = self.handle;
        let prog_num = tokio::task::spawn_blocking(move || unsafe {
            let sym: Symbol<CncRdPrgNum> = lib.get(b"cnc_rdprgnum\0")?;
            let mut o_num: i32 = 0;
            let mut m_num: i32 = 0;
            let mut dummy: i32 = 0;
            let rc = sym(handle, &mut o_num, &mut m_num, &mut dummy);
            if rc != 0 {
                anyhow::bail!("cnc_rdprgnum failed with code {rc}");
            }
            Ok::<i32, anyhow::Error>(o_num)
        })
        .await??;

        Ok(format!("O{prog_num:04}"))
    }

    async fn close(&self) {
        let lib = self.lib.clone();
        let handle = self.handle;
        let _ = tokio::task::spawn_blocking(move || unsafe {
            if let Ok(sym) = lib.get::<CncFreeLibHndl>(b"cnc_freelibhndl\0") {
                let _: i16 = sym(handle);
            }
        })
        .await;
    }
}
