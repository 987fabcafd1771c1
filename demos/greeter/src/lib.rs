//! Greeter service shared by the demo binaries.
//!
//! One call per shape, all speaking UTF-8 names:
//!
//! - `Greeter/SayHello` (unary): `name` → `Hello name`
//! - `Greeter/SayHelloMany` (server streaming): `name` → [`GREETING_COUNT`] × `Hello name`
//! - `Greeter/SayHelloAll` (client streaming): names → `Hello [a b c]`
//! - `Greeter/Chat` (bidirectional): each name → `Hello [names so far]`

use futures::TryStreamExt;
use rivulet::{CallShape, Codec, HandlerRegistry, RpcError, StreamHandle, Utf8Codec};

pub const SAY_HELLO: &str = "Greeter/SayHello";
pub const SAY_HELLO_MANY: &str = "Greeter/SayHelloMany";
pub const SAY_HELLO_ALL: &str = "Greeter/SayHelloAll";
pub const CHAT: &str = "Greeter/Chat";

/// Replies sent by `SayHelloMany`.
pub const GREETING_COUNT: usize = 5;

pub const DEFAULT_ADDR: &str = "127.0.0.1:50051";

pub fn greeting(name: &str) -> String {
    format!("Hello {name}")
}

pub fn render_names(names: &[String]) -> String {
    format!("[{}]", names.join(" "))
}

async fn say_hello(call: StreamHandle) -> Result<(), RpcError> {
    let name = Utf8Codec.decode(call.recv_one().await?.payload())?;
    call.send_value(&Utf8Codec, &greeting(&name)).await
}

async fn say_hello_many(call: StreamHandle) -> Result<(), RpcError> {
    let name = Utf8Codec.decode(call.recv_one().await?.payload())?;
    for _ in 0..GREETING_COUNT {
        call.send_value(&Utf8Codec, &greeting(&name)).await?;
    }
    Ok(())
}

async fn say_hello_all(call: StreamHandle) -> Result<(), RpcError> {
    let names: Vec<String> = call
        .receive()
        .and_then(|message| async move { Utf8Codec.decode(message.payload()) })
        .try_collect()
        .await?;
    tracing::debug!(count = names.len(), "collected names");
    call.send_value(&Utf8Codec, &greeting(&render_names(&names)))
        .await
}

async fn chat(call: StreamHandle) -> Result<(), RpcError> {
    let mut names = Vec::new();
    while let Some(name) = call.recv_value(&Utf8Codec).await? {
        names.push(name);
        call.send_value(&Utf8Codec, &greeting(&render_names(&names)))
            .await?;
    }
    Ok(())
}

pub fn registry() -> Result<HandlerRegistry, RpcError> {
    let mut registry = HandlerRegistry::new();
    registry.register(SAY_HELLO, CallShape::Unary, say_hello)?;
    registry.register(SAY_HELLO_MANY, CallShape::ServerStreaming, say_hello_many)?;
    registry.register(SAY_HELLO_ALL, CallShape::ClientStreaming, say_hello_all)?;
    registry.register(CHAT, CallShape::Bidirectional, chat)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_names() {
        let names: Vec<String> = ["1", "2", "3", "4", "5"].map(String::from).to_vec();
        assert_eq!(greeting(&render_names(&names)), "Hello [1 2 3 4 5]");
        assert_eq!(render_names(&[]), "[]");
    }

    #[test]
    fn test_registry_shapes() {
        let registry = registry().unwrap();
        assert_eq!(registry.shape_of(SAY_HELLO), Some(CallShape::Unary));
        assert_eq!(registry.shape_of(CHAT), Some(CallShape::Bidirectional));
        assert_eq!(registry.len(), 4);
    }
}
