use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;

use demos::helpers;
use netloom::{IoHandler, IoSession, Message, ProtocolCodecFilter, Result};
use netloom_bootstrap::{IoService, ServiceConfig, TcpConnector, UdpConnector};
use netloom_codec::TextLineCodecFactory;
use netloom_executor::LocalExecutorBuilder;

////////////////////////////////////////////////////////////////////////////////////////////////////
struct PrintHandler;

impl IoHandler for PrintHandler {
    fn message_received(&self, _session: &Arc<IoSession>, message: Message) -> Result<()> {
        if let Ok(line) = message.downcast::<String>() {
            println!("{}", line);
        }
        Ok(())
    }

    fn session_closed(&self, session: &Arc<IoSession>) -> Result<()> {
        info!("connection to {} closed", session.remote_addr());
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "Line Client")]
#[command(version = "0.1.0")]
#[command(about = "Sends stdin lines to a server and prints the replies", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("127.0.0.1"))]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Talk over datagrams instead of a stream.
    #[arg(long)]
    udp: bool,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
}

/// Forwards stdin lines until an empty line, `bye` or end of input.
fn pump_stdin(session: Arc<IoSession>) {
    std::thread::spawn(move || {
        let mut buffer = String::new();
        while std::io::stdin().read_line(&mut buffer).unwrap_or(0) > 0 {
            let line = buffer.trim_end().to_string();
            buffer.clear();
            if line.is_empty() || !session.is_connected() {
                break;
            }
            let bye = line == "bye";
            session.write(Box::new(line));
            if bye {
                return;
            }
        }
        session.close(false);
    });
}

async fn talk(service: &IoService, session: Result<Arc<IoSession>>) -> anyhow::Result<()> {
    let session = session?;
    info!("connected {} -> {}, enter bye to stop", session.local_addr(), session.remote_addr());
    pump_stdin(Arc::clone(&session));
    session.close_future().wait().await;
    service.dispose().await;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.debug {
        helpers::init_logger(&cli.log_level)?;
    }
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;

    let mut config = ServiceConfig::default();
    config.workers(1).thread_name_prefix("line-client");
    let codec = Arc::new(ProtocolCodecFilter::new(TextLineCodecFactory::new()));

    info!("connecting {}...", addr);
    LocalExecutorBuilder::new().run(async move {
        if cli.udp {
            let connector = UdpConnector::new(config, Arc::new(PrintHandler))?;
            connector.service().filter_chain().add_last("codec", codec)?;
            let session = connector.connect(addr).wait().await;
            talk(connector.service(), session).await
        } else {
            let connector = TcpConnector::new(config, Arc::new(PrintHandler))?;
            connector.service().filter_chain().add_last("codec", codec)?;
            let session = connector.connect(addr).wait().await;
            talk(connector.service(), session).await
        }
    })??;

    Ok(())
}
