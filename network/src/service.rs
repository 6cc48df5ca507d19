//! Worker-side dispatch of inbound frames and the client-side request
//! handler with one-shot response slots.

use crate::messages::{MessageType, RequestPayload, ResponsePayload, UMessage, ValuePayload};
use crate::partition::RangeRouter;
use crate::transport::{InboundFrame, NetError, Transport};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use ustore_primitives::{ErrorCode, Hash};
use ustore_worker::{Value, Worker};

/// Dispatches request frames to a [`Worker`] and frames the results.
pub struct WorkerService {
    worker: Arc<Worker>,
}

impl WorkerService {
    pub fn new(worker: Arc<Worker>) -> Arc<WorkerService> {
        Arc::new(WorkerService { worker })
    }

    /// Spawns `recv_threads` dispatch threads consuming `inbound` and
    /// answering through `transport`. Threads exit when the inbound
    /// channel closes.
    pub fn serve(
        self: &Arc<WorkerService>,
        transport: Arc<dyn Transport>,
        inbound: Receiver<InboundFrame>,
        recv_threads: usize,
    ) -> Vec<std::thread::JoinHandle<()>> {
        (0..recv_threads.max(1))
            .map(|i| {
                let service = self.clone();
                let transport = transport.clone();
                let inbound = inbound.clone();
                std::thread::Builder::new()
                    .name(format!("worker-recv-{i}"))
                    .spawn(move || {
                        while let Ok((from, frame)) = inbound.recv() {
                            let request = match UMessage::decode(&frame) {
                                Ok(request) => request,
                                Err(err) => {
                                    tracing::warn!(target: "network", %err, %from, "dropping undecodable frame");
                                    continue;
                                }
                            };
                            let response = service.handle(&request);
                            if let Err(err) = transport.send(&from, response.encode()) {
                                tracing::warn!(target: "network", %err, %from, "response send failed");
                            }
                        }
                    })
                    .expect("thread spawn")
            })
            .collect()
    }

    /// Serves one request frame. Run-to-completion: client timeouts never
    /// cancel server-side work.
    pub fn handle(&self, msg: &UMessage) -> UMessage {
        let result = self.dispatch(msg);
        let response = match result {
            Ok(response) => response,
            Err(code) => ResponsePayload { stat: code as u8, ..ResponsePayload::default() },
        };
        msg.respond(response)
    }

    fn dispatch(&self, msg: &UMessage) -> Result<ResponsePayload, ErrorCode> {
        let req = msg.request.as_ref().ok_or(ErrorCode::InvalidParameters)?;
        let ok = || ResponsePayload { stat: ErrorCode::Ok as u8, ..ResponsePayload::default() };
        match msg.msg_type {
            MessageType::Put => {
                let value =
                    msg.value.as_ref().map(ValuePayload::to_value).ok_or(ErrorCode::InvalidValue)?;
                let version = match (&req.version, &req.branch) {
                    (Some(pre), _) => self.worker.put_version(&req.key, &value, pre)?,
                    (None, Some(branch)) => self.worker.put(&req.key, &value, branch)?,
                    (None, None) => return Err(ErrorCode::InvalidParameters),
                };
                Ok(ResponsePayload { version: Some(version), ..ok() })
            }
            MessageType::Get => {
                let cell = match (&req.version, &req.branch) {
                    (Some(version), _) => self.worker.get_version(&req.key, version)?,
                    (None, Some(branch)) => self.worker.get(&req.key, branch)?,
                    (None, None) => return Err(ErrorCode::InvalidParameters),
                };
                let value = self.worker.read_value(&cell)?;
                Ok(ResponsePayload {
                    version: Some(cell.hash()),
                    value: Some(ValuePayload::from_typed(&value)),
                    ..ok()
                })
            }
            MessageType::GetChunk => {
                let version = req.version.as_ref().ok_or(ErrorCode::InvalidParameters)?;
                let chunk = self.worker.get_chunk(&req.key, version)?;
                Ok(ResponsePayload {
                    version: Some(*version),
                    chunk: Some(chunk.record().to_vec()),
                    ..ok()
                })
            }
            MessageType::GetInfo => {
                let info = self.worker.info();
                Ok(ResponsePayload {
                    info: Some(format!(
                        "worker {}: {} chunks, {} bytes",
                        self.worker.id(),
                        info.chunks_total,
                        info.chunk_bytes_total
                    )),
                    ..ok()
                })
            }
            MessageType::Branch => {
                let new_branch =
                    req.ref_branch.as_ref().ok_or(ErrorCode::InvalidParameters)?;
                match (&req.version, &req.branch) {
                    (Some(version), _) => {
                        self.worker.branch_version(&req.key, version, new_branch)?
                    }
                    (None, Some(old)) => self.worker.branch(&req.key, old, new_branch)?,
                    (None, None) => return Err(ErrorCode::InvalidParameters),
                }
                Ok(ok())
            }
            MessageType::Rename => {
                let old = req.branch.as_ref().ok_or(ErrorCode::InvalidParameters)?;
                let new = req.ref_branch.as_ref().ok_or(ErrorCode::InvalidParameters)?;
                self.worker.rename(&req.key, old, new)?;
                Ok(ok())
            }
            MessageType::Merge => {
                let value =
                    msg.value.as_ref().map(ValuePayload::to_value).unwrap_or_default();
                let version = match (&req.branch, &req.ref_branch, &req.version, &req.ref_version)
                {
                    (Some(tgt), Some(reference), _, _) => {
                        self.worker.merge(&req.key, &value, tgt, reference)?
                    }
                    (Some(tgt), None, _, Some(ref_ver)) => {
                        self.worker.merge_version(&req.key, &value, tgt, ref_ver)?
                    }
                    (None, None, Some(ver1), Some(ver2)) => {
                        self.worker.merge_versions(&req.key, &value, ver1, ver2)?
                    }
                    _ => return Err(ErrorCode::InvalidParameters),
                };
                Ok(ResponsePayload { version: Some(version), ..ok() })
            }
            MessageType::List => {
                let lst = if req.key.is_empty() {
                    self.worker.list_keys()
                } else {
                    self.worker.list_branches(&req.key)
                };
                Ok(ResponsePayload { lst, ..ok() })
            }
            MessageType::Exists => {
                let truth = match &req.branch {
                    Some(branch) => self.worker.exists_branch(&req.key, branch),
                    None => self.worker.exists(&req.key),
                };
                Ok(ResponsePayload { truth: Some(truth), ..ok() })
            }
            MessageType::GetBranchHead => {
                let branch = req.branch.as_ref().ok_or(ErrorCode::InvalidParameters)?;
                let head = self.worker.get_branch_head(&req.key, branch);
                Ok(ResponsePayload { version: Some(head), ..ok() })
            }
            MessageType::IsBranchHead => {
                let branch = req.branch.as_ref().ok_or(ErrorCode::InvalidParameters)?;
                let version = req.version.as_ref().ok_or(ErrorCode::InvalidParameters)?;
                let truth = self.worker.is_branch_head(&req.key, branch, version);
                Ok(ResponsePayload { truth: Some(truth), ..ok() })
            }
            MessageType::GetLatestVersion => {
                let lst = self
                    .worker
                    .get_latest_versions(&req.key)
                    .into_iter()
                    .map(|ver| ver.as_bytes().to_vec())
                    .collect();
                Ok(ResponsePayload { lst, ..ok() })
            }
            MessageType::IsLatestVersion => {
                let version = req.version.as_ref().ok_or(ErrorCode::InvalidParameters)?;
                let truth = self.worker.is_latest_version(&req.key, version);
                Ok(ResponsePayload { truth: Some(truth), ..ok() })
            }
            MessageType::Delete => {
                let branch = req.branch.as_ref().ok_or(ErrorCode::InvalidParameters)?;
                self.worker.delete(&req.key, branch)?;
                Ok(ok())
            }
        }
    }
}

/// Client-side request issuing: routes by key hash, sends the frame, and
/// parks on a one-shot response slot keyed by the request's source tag
/// until the response dispatcher wakes it or the timeout expires.
///
/// A timeout abandons the slot without cancelling server-side work; a
/// response arriving after abandonment is discarded.
pub struct RequestHandler {
    transport: Arc<dyn Transport>,
    router: Arc<RangeRouter>,
    pending: Mutex<HashMap<u32, Sender<UMessage>>>,
    next_source: AtomicU32,
    timeout: Duration,
}

impl RequestHandler {
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<RangeRouter>,
        timeout: Duration,
    ) -> Arc<RequestHandler> {
        Arc::new(RequestHandler {
            transport,
            router,
            pending: Mutex::new(HashMap::new()),
            next_source: AtomicU32::new(1),
            timeout,
        })
    }

    /// Spawns the response dispatcher over the client's inbound channel.
    pub fn start_dispatch(
        self: &Arc<RequestHandler>,
        inbound: Receiver<InboundFrame>,
    ) -> std::thread::JoinHandle<()> {
        let handler = self.clone();
        std::thread::Builder::new()
            .name("response-dispatch".to_string())
            .spawn(move || {
                while let Ok((from, frame)) = inbound.recv() {
                    match UMessage::decode(&frame) {
                        Ok(msg) => handler.dispatch_response(msg),
                        Err(err) => {
                            tracing::warn!(target: "network", %err, %from, "dropping undecodable response");
                        }
                    }
                }
            })
            .expect("thread spawn")
    }

    fn dispatch_response(&self, msg: UMessage) {
        match self.pending.lock().remove(&msg.source) {
            // The waiter may have timed out between removal and send;
            // a failed send is just another late response to drop.
            Some(slot) => drop(slot.send(msg)),
            None => {
                tracing::debug!(target: "network", source = msg.source, "discarding late response");
            }
        }
    }

    /// Issues one request and waits for its response payload.
    pub fn request(
        &self,
        msg_type: MessageType,
        request: RequestPayload,
        value: Option<ValuePayload>,
    ) -> Result<ResponsePayload, NetError> {
        let source = self.next_source.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(1);
        self.pending.lock().insert(source, tx);
        let address = self.router.route(&request.key);
        let msg = UMessage { msg_type, source, request: Some(request), value, response: None };
        if let Err(err) = self.transport.send(&address, msg.encode()) {
            self.pending.lock().remove(&source);
            // The range map may be stale; reload for the next attempt.
            let _ = self.router.refresh();
            return Err(err);
        }
        match rx.recv_timeout(self.timeout) {
            Ok(response) => response
                .response
                .ok_or_else(|| NetError::Decode(std::io::Error::other("response payload missing"))),
            Err(_) => {
                self.pending.lock().remove(&source);
                Err(NetError::Timeout)
            }
        }
    }

    pub fn put(&self, key: &[u8], value: &Value, branch: &[u8]) -> Result<ResponsePayload, NetError> {
        self.request(
            MessageType::Put,
            RequestPayload {
                key: key.to_vec(),
                branch: Some(branch.to_vec()),
                ..RequestPayload::default()
            },
            Some(value_payload(value)),
        )
    }

    pub fn get(&self, key: &[u8], branch: &[u8]) -> Result<ResponsePayload, NetError> {
        self.request(
            MessageType::Get,
            RequestPayload {
                key: key.to_vec(),
                branch: Some(branch.to_vec()),
                ..RequestPayload::default()
            },
            None,
        )
    }

    pub fn get_version(&self, key: &[u8], version: &Hash) -> Result<ResponsePayload, NetError> {
        self.request(
            MessageType::Get,
            RequestPayload {
                key: key.to_vec(),
                version: Some(*version),
                ..RequestPayload::default()
            },
            None,
        )
    }

    pub fn branch(
        &self,
        key: &[u8],
        old_branch: &[u8],
        new_branch: &[u8],
    ) -> Result<ResponsePayload, NetError> {
        self.request(
            MessageType::Branch,
            RequestPayload {
                key: key.to_vec(),
                branch: Some(old_branch.to_vec()),
                ref_branch: Some(new_branch.to_vec()),
                ..RequestPayload::default()
            },
            None,
        )
    }

    pub fn merge(
        &self,
        key: &[u8],
        value: &Value,
        tgt_branch: &[u8],
        ref_branch: &[u8],
    ) -> Result<ResponsePayload, NetError> {
        let payload = (!value.is_empty()).then(|| value_payload(value));
        self.request(
            MessageType::Merge,
            RequestPayload {
                key: key.to_vec(),
                branch: Some(tgt_branch.to_vec()),
                ref_branch: Some(ref_branch.to_vec()),
                ..RequestPayload::default()
            },
            payload,
        )
    }

    pub fn exists(&self, key: &[u8]) -> Result<ResponsePayload, NetError> {
        self.request(
            MessageType::Exists,
            RequestPayload { key: key.to_vec(), ..RequestPayload::default() },
            None,
        )
    }

    pub fn get_latest_versions(&self, key: &[u8]) -> Result<ResponsePayload, NetError> {
        self.request(
            MessageType::GetLatestVersion,
            RequestPayload { key: key.to_vec(), ..RequestPayload::default() },
            None,
        )
    }
}

fn value_payload(value: &Value) -> ValuePayload {
    ValuePayload {
        utype: value.utype,
        base: (!value.base.is_null()).then_some(value.base),
        pos: value.pos,
        dels: value.dels,
        values: value.vals.clone(),
        keys: value.keys.clone(),
    }
}
