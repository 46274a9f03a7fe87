//! Calling other modules over the bus.

use edgefleet_core::{ErrorCode, RespMsg};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::bus::ModuleBus;
use crate::error::{BusError, BusResult};
use crate::message::{Message, Operation};

/// Synchronous call returning the raw response, success or not.
pub async fn call_resp<Req: Serialize + ?Sized>(
    bus: &ModuleBus,
    from: &str,
    to: &str,
    operation: Operation,
    resource: &str,
    body: &Req,
) -> BusResult<RespMsg> {
    let msg = Message::with_body(from, to, operation, resource, body)?;
    let reply = bus.request(msg).await?;
    Ok(serde_json::from_value(reply.content)?)
}

/// Synchronous call decoding a successful response's data into `Resp`.
/// Failure codes come back as [`BusError::Remote`].
pub async fn call<Req: Serialize + ?Sized, Resp: DeserializeOwned>(
    bus: &ModuleBus,
    from: &str,
    to: &str,
    operation: Operation,
    resource: &str,
    body: &Req,
) -> BusResult<Resp> {
    let resp = call_resp(bus, from, to, operation, resource, body).await?;
    if !resp.is_success() {
        return Err(BusError::Remote {
            code: resp.code().unwrap_or(ErrorCode::Internal),
            msg: resp.msg,
        });
    }
    Ok(resp.decode()?)
}

/// Fire-and-forget message.
pub async fn notify<Req: Serialize + ?Sized>(
    bus: &ModuleBus,
    from: &str,
    to: &str,
    operation: Operation,
    resource: &str,
    body: &Req,
) -> BusResult<()> {
    let msg = Message::with_body(from, to, operation, resource, body)?;
    bus.send(msg).await
}
