//! Blocking JSON-RPC client for XAPI, as served on `/jsonrpc` by every host.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use log::{debug, trace};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::{
    api::ControlPlane,
    error::{FailureKind, XapiError},
    types::{
        HostRef, SessionRef, SrRecord, SrRef, VbdConfig, VbdRecord, VbdRef, VdiConfig, VdiRef,
        VmRecord, VmRef,
    },
};

const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a [Value],
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    jsonrpc: String,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
    #[serde(default)]
    data: Vec<Value>,
}

pub struct XapiClient {
    url: Url,
    client: reqwest::blocking::Client,
    next_id: AtomicU64,
}

impl XapiClient {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            client: reqwest::blocking::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Sends a single JSON-RPC call and decodes its result.
    pub fn call<R: DeserializeOwned>(&self, method: &str, params: &[Value]) -> Result<R, XapiError> {
        let request = Request {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| XapiError::SerializeRequest(e.to_string()))?;

        debug!("Calling XAPI method '{method}'");
        let response = self
            .client
            .post(self.url.as_str())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .map_err(|e| XapiError::SendRequest(e.to_string()))?
            .error_for_status()
            .map_err(|e| XapiError::HttpError(e.to_string()))?;

        let text = response
            .text()
            .map_err(|e| XapiError::HttpError(e.to_string()))?;

        trace!("XAPI response body for '{method}':\n{text}");

        let jd = &mut serde_json::Deserializer::from_str(&text);
        let response: Response = serde_path_to_error::deserialize(jd)
            .map_err(|e| XapiError::ParseResponse(e.to_string()))?;

        if response.jsonrpc != JSONRPC_VERSION {
            return Err(XapiError::InvalidResponse(format!(
                "Response to '{method}' is not JSON-RPC {JSONRPC_VERSION}"
            )));
        }

        if let Some(error) = response.error {
            return Err(XapiError::failure(
                method,
                FailureKind::from_code(&error.message),
                error
                    .data
                    .into_iter()
                    .map(|d| match d {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
            ));
        }

        serde_json::from_value(response.result)
            .map_err(|e| XapiError::ParseResponse(format!("Unexpected result of '{method}': {e}")))
    }

    fn session_call<R: DeserializeOwned>(
        &self,
        method: &str,
        session: &SessionRef,
        params: &[Value],
    ) -> Result<R, XapiError> {
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(json!(session));
        all.extend_from_slice(params);
        self.call(method, &all)
    }
}

impl ControlPlane for XapiClient {
    fn login(&self, username: &str, password: &str) -> Result<SessionRef, XapiError> {
        self.call("session.login_with_password", &[json!(username), json!(password)])
    }

    fn logout(&self, session: &SessionRef) -> Result<(), XapiError> {
        self.session_call::<Value>("session.logout", session, &[])
            .map(|_| ())
    }

    fn host_get_by_uuid(&self, session: &SessionRef, uuid: &str) -> Result<HostRef, XapiError> {
        self.session_call("host.get_by_uuid", session, &[json!(uuid)])
    }

    fn host_get_other_config(
        &self,
        session: &SessionRef,
        host: &HostRef,
    ) -> Result<HashMap<String, String>, XapiError> {
        self.session_call("host.get_other_config", session, &[json!(host)])
    }

    fn host_set_other_config(
        &self,
        session: &SessionRef,
        host: &HostRef,
        other_config: &HashMap<String, String>,
    ) -> Result<(), XapiError> {
        self.session_call::<Value>(
            "host.set_other_config",
            session,
            &[json!(host), json!(other_config)],
        )
        .map(|_| ())
    }

    fn vm_get_all_records(
        &self,
        session: &SessionRef,
    ) -> Result<HashMap<VmRef, VmRecord>, XapiError> {
        self.session_call("VM.get_all_records", session, &[])
    }

    fn sr_get_all(&self, session: &SessionRef) -> Result<Vec<SrRef>, XapiError> {
        self.session_call("SR.get_all", session, &[])
    }

    fn sr_get_record(&self, session: &SessionRef, sr: &SrRef) -> Result<SrRecord, XapiError> {
        self.session_call("SR.get_record", session, &[json!(sr)])
    }

    fn vdi_create(&self, session: &SessionRef, config: &VdiConfig) -> Result<VdiRef, XapiError> {
        self.session_call("VDI.create", session, &[json!(config)])
    }

    fn vdi_get_by_uuid(&self, session: &SessionRef, uuid: &str) -> Result<VdiRef, XapiError> {
        self.session_call("VDI.get_by_uuid", session, &[json!(uuid)])
    }

    fn vdi_get_uuid(&self, session: &SessionRef, vdi: &VdiRef) -> Result<String, XapiError> {
        self.session_call("VDI.get_uuid", session, &[json!(vdi)])
    }

    fn vdi_get_vbds(&self, session: &SessionRef, vdi: &VdiRef) -> Result<Vec<VbdRef>, XapiError> {
        self.session_call("VDI.get_VBDs", session, &[json!(vdi)])
    }

    fn vbd_create(&self, session: &SessionRef, config: &VbdConfig) -> Result<VbdRef, XapiError> {
        self.session_call("VBD.create", session, &[json!(config)])
    }

    fn vbd_get_record(&self, session: &SessionRef, vbd: &VbdRef) -> Result<VbdRecord, XapiError> {
        self.session_call("VBD.get_record", session, &[json!(vbd)])
    }

    fn vbd_get_device(&self, session: &SessionRef, vbd: &VbdRef) -> Result<String, XapiError> {
        self.session_call("VBD.get_device", session, &[json!(vbd)])
    }

    fn vbd_plug(&self, session: &SessionRef, vbd: &VbdRef) -> Result<(), XapiError> {
        self.session_call::<Value>("VBD.plug", session, &[json!(vbd)])
            .map(|_| ())
    }

    fn vbd_unplug(&self, session: &SessionRef, vbd: &VbdRef) -> Result<(), XapiError> {
        self.session_call::<Value>("VBD.unplug", session, &[json!(vbd)])
            .map(|_| ())
    }

    fn vbd_destroy(&self, session: &SessionRef, vbd: &VbdRef) -> Result<(), XapiError> {
        self.session_call::<Value>("VBD.destroy", session, &[json!(vbd)])
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use maplit::hashmap;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> XapiClient {
        XapiClient::new(Url::parse(&format!("{}/jsonrpc", server.url())).unwrap())
    }

    #[test]
    fn test_login() {
        // Request a new server from the pool
        let mut server = mockito::Server::new();

        let login_mock = server
            .mock("POST", "/jsonrpc")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({
                "jsonrpc": "2.0",
                "method": "session.login_with_password",
                "params": ["root", ""],
            })))
            .with_status(200)
            .with_body(indoc::indoc! {r#"
                {"jsonrpc": "2.0", "result": "OpaqueRef:session", "id": 1}"#})
            .expect(1)
            .create();

        let session = client(&server).login("root", "").unwrap();
        assert_eq!(session, SessionRef::new("OpaqueRef:session"));

        login_mock.assert();
    }

    #[test]
    fn test_session_is_first_param() {
        let mut server = mockito::Server::new();

        let mock = server
            .mock("POST", "/jsonrpc")
            .match_body(Matcher::PartialJson(json!({
                "method": "VBD.get_device",
                "params": ["OpaqueRef:session", "OpaqueRef:vbd"],
            })))
            .with_status(200)
            .with_body(r#"{"jsonrpc": "2.0", "result": "xvdb", "id": 1}"#)
            .expect(1)
            .create();

        let device = client(&server)
            .vbd_get_device(
                &SessionRef::new("OpaqueRef:session"),
                &VbdRef::new("OpaqueRef:vbd"),
            )
            .unwrap();
        assert_eq!(device, "xvdb");

        mock.assert();
    }

    #[test]
    fn test_failure() {
        let mut server = mockito::Server::new();

        let mock = server
            .mock("POST", "/jsonrpc")
            .with_status(200)
            .with_body(indoc::indoc! {r#"
                {
                    "jsonrpc": "2.0",
                    "error": {
                        "code": 1,
                        "message": "DEVICE_ALREADY_EXISTS",
                        "data": ["0"]
                    },
                    "id": 1
                }"#})
            .expect(1)
            .create();

        let err = client(&server)
            .vbd_create(
                &SessionRef::new("OpaqueRef:session"),
                &VbdConfig::disk(VdiRef::new("OpaqueRef:vdi"), VmRef::new("OpaqueRef:vm"), 0),
            )
            .unwrap_err();
        assert_eq!(
            err,
            XapiError::failure(
                "VBD.create",
                FailureKind::DeviceAlreadyExists,
                vec!["0".into()]
            )
        );

        mock.assert();
    }

    #[test]
    fn test_void_result() {
        let mut server = mockito::Server::new();

        let mock = server
            .mock("POST", "/jsonrpc")
            .match_body(Matcher::PartialJson(json!({"method": "VBD.plug"})))
            .with_status(200)
            .with_body(r#"{"jsonrpc": "2.0", "result": "", "id": 1}"#)
            .expect(1)
            .create();

        client(&server)
            .vbd_plug(
                &SessionRef::new("OpaqueRef:session"),
                &VbdRef::new("OpaqueRef:vbd"),
            )
            .unwrap();

        mock.assert();
    }

    #[test]
    fn test_map_result() {
        let mut server = mockito::Server::new();

        let mock = server
            .mock("POST", "/jsonrpc")
            .match_body(Matcher::PartialJson(json!({"method": "VM.get_all_records"})))
            .with_status(200)
            .with_body(indoc::indoc! {r#"
                {
                    "jsonrpc": "2.0",
                    "result": {
                        "OpaqueRef:dom0": {
                            "uuid": "dom0-uuid",
                            "name_label": "Control domain on host: xs1",
                            "is_control_domain": true,
                            "resident_on": "OpaqueRef:host",
                            "power_state": "Running"
                        }
                    },
                    "id": 1
                }"#})
            .expect(1)
            .create();

        let vms = client(&server)
            .vm_get_all_records(&SessionRef::new("OpaqueRef:session"))
            .unwrap();
        assert_eq!(vms.len(), 1);
        let dom0 = &vms[&VmRef::new("OpaqueRef:dom0")];
        assert!(dom0.is_control_domain);
        assert_eq!(dom0.resident_on, HostRef::new("OpaqueRef:host"));

        mock.assert();
    }

    #[test]
    fn test_set_other_config() {
        let mut server = mockito::Server::new();

        let mock = server
            .mock("POST", "/jsonrpc")
            .match_body(Matcher::PartialJson(json!({
                "method": "host.set_other_config",
                "params": [
                    "OpaqueRef:session",
                    "OpaqueRef:host",
                    {"backup_vdi_uuid": "vdi-uuid"}
                ],
            })))
            .with_status(200)
            .with_body(r#"{"jsonrpc": "2.0", "result": null, "id": 1}"#)
            .expect(1)
            .create();

        client(&server)
            .host_set_other_config(
                &SessionRef::new("OpaqueRef:session"),
                &HostRef::new("OpaqueRef:host"),
                &hashmap! {"backup_vdi_uuid".to_string() => "vdi-uuid".to_string()},
            )
            .unwrap();

        mock.assert();
    }

    #[test]
    fn test_invalid_responses() {
        let mut server = mockito::Server::new();

        let http_mock = server
            .mock("POST", "/jsonrpc")
            .with_status(500)
            .expect(1)
            .create();
        let err = client(&server)
            .sr_get_all(&SessionRef::new("OpaqueRef:session"))
            .unwrap_err();
        assert!(matches!(err, XapiError::HttpError(_)));
        http_mock.assert();
        http_mock.remove();

        let garbage_mock = server
            .mock("POST", "/jsonrpc")
            .with_status(200)
            .with_body("not json")
            .expect(1)
            .create();
        let err = client(&server)
            .sr_get_all(&SessionRef::new("OpaqueRef:session"))
            .unwrap_err();
        assert!(matches!(err, XapiError::ParseResponse(_)));
        garbage_mock.assert();
        garbage_mock.remove();

        let empty_mock = server
            .mock("POST", "/jsonrpc")
            .with_status(200)
            .with_body(r#"{"result": [], "id": 1}"#)
            .expect(1)
            .create();
        let err = client(&server)
            .sr_get_all(&SessionRef::new("OpaqueRef:session"))
            .unwrap_err();
        assert!(matches!(err, XapiError::InvalidResponse(_)));
        empty_mock.assert();
    }

    #[test]
    fn test_send_error() {
        // Nothing listens on port 1
        let client = XapiClient::new(Url::parse("http://127.0.0.1:1/jsonrpc").unwrap());
        let err = client.login("root", "").unwrap_err();
        assert!(matches!(err, XapiError::SendRequest(_)));
    }
}
