//! MFT 수신자 - Multiplexed File Transfer
//!
//! 컨트롤 핸드쉐이크로 채널 설정을 받고, 모든 채널이 준비되면
//! 여러 UDP 채널에서 도착하는 청크를 모아 ID 순서로 재조립한다.
//!
//! 사용법:
//!   cargo run --release --bin mft-receiver -- --bind 0.0.0.0:9000 --output ./downloads

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use mft::udp::{UdpControlChannel, UdpDataChannel};
use mft::{Config, Receiver};

/// 수신자 설정
struct ReceiverArgs {
    bind_addr: SocketAddr,
    output_dir: PathBuf,
    channels: usize,
    data_ip: IpAddr,
    config: Config,
}

impl Default for ReceiverArgs {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".parse().unwrap(),
            output_dir: PathBuf::from("."),
            channels: 1,
            data_ip: "127.0.0.1".parse().unwrap(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ReceiverArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ReceiverArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    parsed.output_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--channels" | "-n" => {
                if i + 1 < args.len() {
                    parsed.channels = args[i + 1].parse().expect("유효한 숫자 필요");
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
                    r#"MFT Receiver - Multiplexed File Transfer 수신자

여러 UDP 채널에서 도착하는 청크를 모아 순서대로 재조립하는 수신 엔진
- 채널/도착 순서 무관, 청크 ID 기준 재조립
- 중복 청크 무시, 도착마다 ACK 회신

사용법:
  cargo run --release --bin mft-receiver -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       컨트롤 바인드 주소 (기본: 0.0.0.0:9000)
  -o, --output <DIR>      출력 디렉터리 (기본: .)
  -n, --channels <N>      데이터 채널 수 (기본: 1, 송신자와 같아야 함)
  --data-ip <IP>          데이터 소켓 바인드 IP (기본: 127.0.0.1)
  -h, --help              이 도움말 출력

예시:
  # 기본 수신
  cargo run --release --bin mft-receiver -- -b 0.0.0.0:9000 -o ./downloads

  # 채널 2개 수신
  cargo run --release --bin mft-receiver -- -b 0.0.0.0:9000 -n 2
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

    info!("MFT Receiver starting...");
    info!("Control bind: {}", args.bind_addr);
    info!("Output dir: {:?}", args.output_dir);
    info!("Channels: {}", args.channels);

    let control = UdpControlChannel::receiver(args.bind_addr);
    let receiver = Receiver::new(control, args.config);

    for idx in 0..args.channels {
        let bind = SocketAddr::new(args.data_ip, 0);
        receiver.register_channel(UdpDataChannel::new(format!("ch{}", idx), bind))?;
    }

    info!("Waiting for transfer metadata...");

    let path = receiver.receive(&args.output_dir).await?;

    let stats = receiver.stats();
    info!("Transfer complete: {}", path.display());
    info!("{}", stats.summary());

    Ok(())
}
