//! MFT 송신자 - Multiplexed File Transfer
//!
//! 파일을 청크로 분할해 여러 UDP 데이터 채널로 나눠 보내고,
//! 청크별 ACK/재전송으로 전달을 보장한다.
//!
//! 사용법:
//!   cargo run --release --bin mft-sender -- --control 127.0.0.1:9000 --file data.bin
//!
//! 예시:
//!   # 채널 2개로 분산 전송
//!   cargo run --release --bin mft-sender -- -c 127.0.0.1:9000 -f data.bin --channels 2

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use mft::udp::{UdpControlChannel, UdpDataChannel};
use mft::{Config, Sender, DEFAULT_CHUNK_SIZE};

/// 송신자 설정
struct SenderArgs {
    control_addr: Option<SocketAddr>,
    file_path: Option<PathBuf>,
    channels: usize,
    chunk_size: usize,
    data_ip: IpAddr,
    config: Config,
}

impl Default for SenderArgs {
    fn default() -> Self {
        Self {
            control_addr: None,
            file_path: None,
            channels: 1,
            chunk_size: DEFAULT_CHUNK_SIZE,
            data_ip: "127.0.0.1".parse().unwrap(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> SenderArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = SenderArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--control" | "-c" => {
                if i + 1 < args.len() {
                    parsed.control_addr = Some(args[i + 1].parse().expect("유효한 주소 필요"));
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    parsed.file_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--channels" | "-n" => {
                if i + 1 < args.len() {
                    parsed.channels = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--chunk-size" => {
                if i + 1 < args.len() {
                    parsed.chunk_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--retry-timeout" => {
                if i + 1 < args.len() {
                    parsed.config.retry_timeout_ms = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--data-ip" => {
                if i + 1 < args.len() {
                    parsed.data_ip = args[i + 1].parse().expect("유효한 IP 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"MFT Sender - Multiplexed File Transfer 송신자

파일을 청크로 분할해 여러 UDP 채널로 나눠 보내는 송신 엔진
- 청크별 ACK 추적 + 타임아웃 재전송
- 모든 채널 준비 후에만 데이터 전송 시작

사용법:
  cargo run --release --bin mft-sender -- [OPTIONS]

옵션:
  -c, --control <ADDR>    수신자 컨트롤 주소 (필수)
  -f, --file <PATH>       전송할 파일 경로 (필수)
  -n, --channels <N>      데이터 채널 수 (기본: 1)
  --chunk-size <SIZE>     청크 크기 바이트 (기본: 1200)
  --retry-timeout <MS>    재전송 타임아웃 밀리초 (기본: 1000)
  --data-ip <IP>          데이터 소켓 바인드 IP (기본: 127.0.0.1)
  -h, --help              이 도움말 출력

예시:
  # 단일 채널 전송
  cargo run --release --bin mft-sender -- -c 127.0.0.1:9000 -f data.bin

  # 채널 2개 + 짧은 재전송 타임아웃
  cargo run --release --bin mft-sender -- -c 127.0.0.1:9000 -f data.bin -n 2 --retry-timeout 200
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    let control_addr = args.control_addr.expect("--control 필요 (--help 참고)");
    let file_path = args.file_path.expect("--file 필요 (--help 참고)");

    info!("MFT Sender starting...");
    info!("Control address: {}", control_addr);
    info!("File: {:?}", file_path);
    info!("Channels: {}", args.channels);
    info!("Chunk size: {} bytes", args.chunk_size);
    info!("Retry timeout: {} ms", args.config.retry_timeout_ms);

    let control = UdpControlChannel::sender("0.0.0.0:0".parse()?, control_addr);
    let sender = Sender::new(control, args.config);

    for idx in 0..args.channels {
        let bind = SocketAddr::new(args.data_ip, 0);
        sender.register_channel(UdpDataChannel::new(format!("ch{}", idx), bind))?;
    }

    sender.send_file(&file_path, args.chunk_size).await?;

    let stats = sender.stats();
    info!("Transfer complete!");
    info!("{}", stats.summary());

    Ok(())
}
