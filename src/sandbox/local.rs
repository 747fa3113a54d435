use anyhow::{Result, anyhow};
use pyo3::prelude::*;
use pyo3::types::{PyAnyMethods, PyDict, PyDictMethods, PyModule, PyModuleMethods};
use std::ffi::CString;

use super::{Execution, Sandbox, SandboxError, SandboxResult};

const MODULE_NAME: &str = "offline_fc_sandbox";
const RUN_HELPER: &str = "_ofc_run_snippet";

/// Embedded CPython interpreter used as an unisolated sandbox.
///
/// Each instance owns a fresh module namespace, so globals persist across
/// `run` calls but not across instances. Snippets run with the full
/// privileges of this process.
#[derive(Default)]
pub struct LocalInterpreter {
    module: Option<Py<PyModule>>,
}

impl LocalInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.module.is_some()
    }

    fn initialize() -> Result<Py<PyModule>> {
        Python::attach(|py| -> Result<Py<PyModule>> {
            let module = PyModule::new(py, MODULE_NAME)?;
            Self::install_helpers(py, &module)?;
            Self::health_check(py, &module)?;
            Ok(module.unbind())
        })
    }

    fn health_check(py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
        let globals = module.dict();
        let _ = py.eval(c"1 + 1", Some(&globals), Some(&globals))?;
        Ok(())
    }

    fn install_helpers(py: Python<'_>, module: &Bound<'_, PyModule>) -> Result<()> {
        let globals = module.dict();
        let helper_code = CString::new(include_str!("local_helpers.py"))?;
        py.run(helper_code.as_c_str(), Some(&globals), Some(&globals))?;
        Ok(())
    }

    fn run_snippet(module: &Py<PyModule>, code: &str) -> Result<Execution> {
        Python::attach(|py| -> Result<Execution> {
            let module = module.bind(py);
            let helper = module.getattr(RUN_HELPER)?;
            let result = helper.call1((code,))?;
            let dict = Self::cast_dict(&result)?;

            let ok: bool = Self::dict_item(dict, "ok")?.extract()?;
            let stdout: String = Self::dict_item(dict, "stdout")?.extract()?;
            let stderr: String = Self::dict_item(dict, "stderr")?.extract()?;

            let status = if ok { "success" } else { "error" };
            Ok(Execution::new(
                status,
                stdout.trim_end_matches('\n'),
                stderr.trim_end_matches('\n'),
                !ok,
            ))
        })
    }

    fn dict_item<'py>(dict: &Bound<'py, PyDict>, key: &str) -> Result<Bound<'py, PyAny>> {
        dict.get_item(key)?
            .ok_or_else(|| anyhow!("missing {key} in helper result"))
    }

    fn cast_dict<'a>(value: &'a Bound<'a, PyAny>) -> Result<&'a Bound<'a, PyDict>> {
        value
            .cast::<PyDict>()
            .map_err(|err| anyhow!(err.to_string()))
    }
}

impl Sandbox for LocalInterpreter {
    async fn start(&mut self) -> SandboxResult<()> {
        if self.module.is_none() {
            let module =
                Self::initialize().map_err(|err| SandboxError::Interpreter(err.to_string()))?;
            self.module = Some(module);
        }
        Ok(())
    }

    async fn run(&self, code: &str) -> SandboxResult<Execution> {
        let module = self.module.as_ref().ok_or(SandboxError::NotStarted)?;
        Self::run_snippet(module, code).map_err(|err| SandboxError::Interpreter(err.to_string()))
    }

    async fn stop(&mut self) -> SandboxResult<()> {
        self.module = None;
        Ok(())
    }
}
