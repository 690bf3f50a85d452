use async_trait::async_trait;
use buildmaster::models::Builder;
use buildmaster::pool::SlaveConnector;
use buildmaster_common::api::slave::{
    BuildOutcome, FileMap, SlaveError, SlaveInfo, SlaveRpc, SlaveStatus, StartBuildRequest,
};
use buildmaster_common::api::PROTOCOL_VERSION;
use buildmaster_common::errors::*;
use buildmaster_common::utils;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

struct FakeState {
    reachable: bool,
    corrupt_uploads: bool,
    corrupt_downloads: bool,
    garbled_status: bool,
    protocol_version: String,
    status: SlaveStatus,
    files: HashMap<String, Vec<u8>>,
    started: Vec<StartBuildRequest>,
    cleaned: usize,
    log: Vec<u8>,
}

/// A builder that does whatever the test tells it to.
pub struct FakeSlave {
    arch_tag: String,
    state: Mutex<FakeState>,
}

impl FakeSlave {
    pub fn new(arch_tag: &str) -> Arc<FakeSlave> {
        Arc::new(FakeSlave {
            arch_tag: arch_tag.to_string(),
            state: Mutex::new(FakeState {
                reachable: true,
                corrupt_uploads: false,
                corrupt_downloads: false,
                garbled_status: false,
                protocol_version: PROTOCOL_VERSION.to_string(),
                status: SlaveStatus::Idle,
                files: HashMap::new(),
                started: Vec::new(),
                cleaned: 0,
                log: Vec::new(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    pub fn set_protocol_version(&self, version: &str) {
        self.state().protocol_version = version.to_string();
    }

    pub fn corrupt_uploads(&self) {
        self.state().corrupt_uploads = true;
    }

    /// Files handed back to the master no longer match their sha1.
    pub fn corrupt_downloads(&self) {
        self.state().corrupt_downloads = true;
    }

    /// Answer status calls with something that is not a status.
    pub fn garble_status(&self) {
        self.state().garbled_status = true;
    }

    /// Drop everything from the file cache.
    pub fn lose_files(&self) {
        self.state().files.clear();
    }

    pub fn set_status(&self, status: SlaveStatus) {
        self.state().status = status;
    }

    pub fn append_log(&self, data: &[u8]) {
        self.state().log.extend_from_slice(data);
    }

    /// Cookie of the build we were asked to run last.
    pub fn cookie(&self) -> Option<String> {
        self.state().started.last().map(|r| r.build_cookie.clone())
    }

    /// Finish the current build, produced files are put into our file cache.
    pub fn finish(&self, outcome: BuildOutcome, files: &[(&str, &[u8])], dependencies: Option<&str>) {
        let build_cookie = self.cookie().expect("no build was started");
        let mut state = self.state();
        let mut map = FileMap::new();
        for (name, content) in files {
            let sha1 = utils::sha1_hex(content);
            state.files.insert(sha1.clone(), content.to_vec());
            map.insert(name.to_string(), sha1);
        }
        state.status = SlaveStatus::Waiting {
            build_cookie,
            outcome,
            files: map,
            dependencies: dependencies.map(String::from),
            build_log: None,
        };
    }

    pub fn started(&self) -> Vec<StartBuildRequest> {
        self.state().started.clone()
    }

    pub fn cleaned(&self) -> usize {
        self.state().cleaned
    }

    pub fn has_file(&self, sha1: &str) -> bool {
        self.state().files.contains_key(sha1)
    }

    fn check_reachable(&self) -> Result<(), SlaveError> {
        if self.state().reachable {
            Ok(())
        } else {
            Err(SlaveError::Unreachable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl SlaveRpc for FakeSlave {
    async fn echo(&self, args: &[String]) -> Result<Vec<String>, SlaveError> {
        self.check_reachable()?;
        Ok(args.to_vec())
    }

    async fn info(&self) -> Result<SlaveInfo, SlaveError> {
        self.check_reachable()?;
        Ok(SlaveInfo {
            protocol_version: self.state().protocol_version.clone(),
            methods: Vec::new(),
            arch_tag: self.arch_tag.clone(),
            mechanisms: vec!["chroot".to_string()],
        })
    }

    async fn have_file(&self, sha1: &str, _url: Option<&str>) -> Result<bool, SlaveError> {
        self.check_reachable()?;
        Ok(self.has_file(sha1))
    }

    async fn store_file(&self, mut content: Vec<u8>) -> Result<String, SlaveError> {
        self.check_reachable()?;
        let mut state = self.state();
        if state.corrupt_uploads {
            content.push(0);
        }
        let sha1 = utils::sha1_hex(&content);
        state.files.insert(sha1.clone(), content);
        Ok(sha1)
    }

    async fn start_build(&self, request: &StartBuildRequest) -> Result<(), SlaveError> {
        self.check_reachable()?;
        let mut state = self.state();
        if !state.status.is_idle() {
            return Err(SlaveError::ProtocolFault("builder is busy".to_string()));
        }
        let missing = request
            .files
            .values()
            .chain(Some(&request.chroot_sha1))
            .any(|sha1| !state.files.contains_key(sha1));
        if missing {
            return Err(SlaveError::ProtocolFault("file is not in the cache".to_string()));
        }
        state.started.push(request.clone());
        state.status = SlaveStatus::Building {
            build_cookie: request.build_cookie.clone(),
        };
        Ok(())
    }

    async fn status(&self) -> Result<SlaveStatus, SlaveError> {
        self.check_reachable()?;
        let state = self.state();
        if state.garbled_status {
            return Err(SlaveError::ProtocolFault("status is not a struct".to_string()));
        }
        Ok(state.status.clone())
    }

    async fn fetch_log_tail(&self) -> Result<Vec<u8>, SlaveError> {
        self.check_reachable()?;
        Ok(self.state().log.clone())
    }

    async fn fetch_file(&self, sha1: &str) -> Result<Vec<u8>, SlaveError> {
        self.check_reachable()?;
        let state = self.state();
        let mut content = state
            .files
            .get(sha1)
            .cloned()
            .ok_or_else(|| SlaveError::ProtocolFault(format!("no such file: {}", sha1)))?;
        if state.corrupt_downloads {
            content.push(0);
        }
        Ok(content)
    }

    async fn clean(&self) -> Result<(), SlaveError> {
        self.check_reachable()?;
        let mut state = self.state();
        state.status = SlaveStatus::Idle;
        state.log.clear();
        state.cleaned += 1;
        Ok(())
    }
}

/// Hands out fake builders by url.
#[derive(Default)]
pub struct FakeConnector {
    slaves: Mutex<HashMap<String, Arc<FakeSlave>>>,
}

impl FakeConnector {
    pub fn add(&self, url: &str, slave: Arc<FakeSlave>) {
        self.slaves.lock().unwrap().insert(url.to_string(), slave);
    }

    pub fn get(&self, url: &str) -> Arc<FakeSlave> {
        self.slaves
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .expect("no fake builder for url")
    }
}

impl SlaveConnector for FakeConnector {
    fn connect(&self, builder: &Builder) -> Result<Arc<dyn SlaveRpc>> {
        let slave = self
            .slaves
            .lock()
            .unwrap()
            .get(&builder.url)
            .cloned()
            .ok_or_else(|| anyhow!("No fake builder for {:?}", builder.url))?;
        Ok(slave as Arc<dyn SlaveRpc>)
    }
}
