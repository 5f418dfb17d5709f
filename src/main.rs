use rancher_logstash_adapter::{AdapterError, app};

#[tokio::main]
async fn main() -> Result<(), AdapterError> {
    app::main().await
}
