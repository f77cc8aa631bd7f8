use serde_json::{json, Value};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

fn spawn_adapter(args: &[&str]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_mta-dap"))
        .args(args)
        .env_remove("MTA_DAP_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn mta-dap");
    let stdin = child.stdin.take().expect("stdin");
    let stdout = BufReader::new(child.stdout.take().expect("stdout"));
    (child, stdin, stdout)
}

fn request(stdin: &mut ChildStdin, stdout: &mut impl BufRead, seq: i64, command: &str) -> Value {
    write_dap_message(
        stdin,
        &json!({"seq": seq, "type": "request", "command": command, "arguments": {}}),
    );
    let response = read_dap_response(stdout, seq);
    assert_eq!(response["success"], true, "{command} failed: {response}");
    response
}

#[test]
fn stdio_adapter_loads_config_from_flag() {
    let temp = TempDir::new().expect("tempdir");
    let config_path = temp.path().join("mta-dap.toml");
    fs::write(
        &config_path,
        "[backend]\nurl = \"http://127.0.0.1:9\"\npoll_interval_ms = 50\n\n[logging]\nlevel = \"debug\"\nstderr = false\n",
    )
    .expect("write config");

    let (mut child, mut stdin, mut stdout) =
        spawn_adapter(&["--config", config_path.to_str().expect("utf-8 path")]);

    let initialize = request(&mut stdin, &mut stdout, 1, "initialize");
    assert_eq!(initialize["body"]["supportsRestartRequest"], true);

    let threads = request(&mut stdin, &mut stdout, 2, "threads");
    assert_eq!(threads["body"]["threads"].as_array().unwrap().len(), 2);

    request(&mut stdin, &mut stdout, 3, "disconnect");
    drop(stdin);
    let status = child.wait().expect("wait");
    assert!(status.success());
}

#[test]
fn single_context_flag_exposes_one_thread() {
    let (mut child, mut stdin, mut stdout) = spawn_adapter(&["--single-context"]);

    request(&mut stdin, &mut stdout, 1, "initialize");
    let threads = request(&mut stdin, &mut stdout, 2, "threads");
    assert_eq!(threads["body"]["threads"], json!([{"id": 1, "name": "Server"}]));

    request(&mut stdin, &mut stdout, 3, "disconnect");
    drop(stdin);
    assert!(child.wait().expect("wait").success());
}

#[test]
fn unreadable_config_falls_back_to_defaults() {
    let temp = TempDir::new().expect("tempdir");
    let missing = temp.path().join("missing.toml");

    let (mut child, mut stdin, mut stdout) =
        spawn_adapter(&["--config", missing.to_str().expect("utf-8 path")]);

    request(&mut stdin, &mut stdout, 1, "initialize");
    request(&mut stdin, &mut stdout, 2, "disconnect");
    drop(stdin);
    assert!(child.wait().expect("wait").success());
}

fn write_dap_message(writer: &mut impl Write, message: &Value) {
    let bytes = serde_json::to_vec(message).expect("serialize");
    write!(writer, "Content-Length: {}\r\n\r\n", bytes.len()).expect("write header");
    writer.write_all(&bytes).expect("write body");
    writer.flush().expect("flush");
}

fn read_dap_response(reader: &mut impl BufRead, request_seq: i64) -> Value {
    loop {
        let msg = read_dap_message(reader);
        if msg.get("type").and_then(|v| v.as_str()) == Some("response")
            && msg.get("request_seq").and_then(|v| v.as_i64()) == Some(request_seq)
        {
            return msg;
        }
    }
}

fn read_dap_message(reader: &mut impl BufRead) -> Value {
    let mut content_length = None;
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).expect("read header line");
        assert!(read > 0, "adapter closed stdout");
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(value.trim().parse::<usize>().expect("content length"));
            }
        }
    }

    let len = content_length.expect("Content-Length header");
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf).expect("read body");
    serde_json::from_slice(&buf).expect("parse body")
}
