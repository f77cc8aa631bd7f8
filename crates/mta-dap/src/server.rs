use mta_config::BackendConfig;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::dap::codec::{DapReader, DapWriter};
use crate::dap::sender::DapSender;
use crate::error::AdapterResult;
use crate::session::{Flow, Session};

/// Run the adapter over stdio.
pub async fn run_stdio(config: BackendConfig) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run(stdin, stdout, config).await.map_err(anyhow::Error::from)
}

/// Serves one DAP session on `reader`/`writer` until the client disconnects or closes the
/// stream. Returns once every queued message has been written.
pub async fn run<R, W>(reader: R, writer: W, config: BackendConfig) -> AdapterResult<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

    let writer_task = tokio::spawn(async move {
        let mut writer = DapWriter::new(writer);
        while let Some(msg) = out_rx.recv().await {
            if let Err(err) = writer.write_value(&msg).await {
                tracing::warn!(target: "mta_dap", error = %err, "failed to write DAP message; closing output");
                break;
            }
        }
    });

    let sender = DapSender::new(out_tx);
    let session = Session::new(config, sender.clone())?;
    let mut reader = DapReader::new(reader);

    let result = loop {
        let request = match reader.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err.into()),
        };
        if request.message_type != "request" {
            continue;
        }

        sender.trace_inbound(&request);
        if session.handle(request) == Flow::Exit {
            break Ok(());
        }
    };

    session.shutdown();
    drop(session);
    drop(sender);
    let _ = writer_task.await;
    result
}
