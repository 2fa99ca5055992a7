use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use demos::helpers;
use netloom::{
    IdleStatus, IoHandler, IoSession, LoggingFilter, Message, ProtocolCodecFilter, Result,
};
use netloom_bootstrap::{IoService, ServiceConfig, TcpAcceptor, UdpAcceptor};
use netloom_codec::TextLineCodecFactory;
use netloom_executor::{ExecutorFilter, LocalExecutorBuilder, ThreadPool};

////////////////////////////////////////////////////////////////////////////////////////////////////
struct EchoHandler;

impl IoHandler for EchoHandler {
    fn session_opened(&self, session: &Arc<IoSession>) -> Result<()> {
        info!("{} joined", session.remote_addr());
        Ok(())
    }

    fn session_closed(&self, session: &Arc<IoSession>) -> Result<()> {
        info!(
            "{} left after {} bytes in, {} bytes out",
            session.remote_addr(),
            session.read_bytes(),
            session.written_bytes()
        );
        Ok(())
    }

    fn session_idle(&self, session: &Arc<IoSession>, status: IdleStatus) -> Result<()> {
        info!("{} is {:?}, closing", session.remote_addr(), status);
        session.close(true);
        Ok(())
    }

    fn message_received(&self, session: &Arc<IoSession>, message: Message) -> Result<()> {
        let Ok(line) = message.downcast::<String>() else {
            return Ok(());
        };
        info!("received: {} from {}", line, session.remote_addr());
        let bye = line.trim() == "bye";
        session.write(line);
        if bye {
            session.close(false);
        }
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "Echo Server")]
#[command(version = "0.1.0")]
#[command(about = "Echoes every line back to its sender", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("0.0.0.0"))]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Serve datagrams instead of streams.
    #[arg(long)]
    udp: bool,
    #[arg(long, default_value_t = 2)]
    workers: usize,
    /// Run the handler on a pool of this many threads instead of the reactor workers.
    #[arg(long, default_value_t = 0)]
    handler_threads: usize,
    /// Close sessions idle for this many seconds; 0 disables.
    #[arg(long, default_value_t = 300)]
    idle_secs: u64,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
}

fn install_filters(service: &IoService, handler_threads: usize) -> anyhow::Result<()> {
    let mut chain = service.filter_chain();
    chain.add_last("logger", Arc::new(LoggingFilter::new("echo_server")))?;
    chain.add_last(
        "codec",
        Arc::new(ProtocolCodecFilter::new(TextLineCodecFactory::new())),
    )?;
    if handler_threads > 0 {
        let pool = ThreadPool::new("echo-handler", handler_threads)?;
        chain.add_last("executor", Arc::new(ExecutorFilter::new(pool)))?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.debug {
        helpers::init_logger(&cli.log_level)?;
    }
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;

    let mut config = ServiceConfig::default();
    config.workers(cli.workers).thread_name_prefix("echo-worker");
    if cli.idle_secs > 0 {
        config
            .session_config_mut()
            .idle_time(IdleStatus::BothIdle, Duration::from_secs(cli.idle_secs));
    }

    let stop = helpers::ctrl_c()?;
    if cli.udp {
        let acceptor = UdpAcceptor::new(config, Arc::new(EchoHandler))?;
        install_filters(acceptor.service(), cli.handler_threads)?;
        let local_addr = acceptor.bind(addr)?;
        info!("listening udp {}, try `nc -u {} {}`", local_addr, cli.host, cli.port);
        LocalExecutorBuilder::new().run(async {
            let _ = stop.await;
            acceptor.service().dispose().await;
        })?;
    } else {
        let acceptor = TcpAcceptor::new(config, Arc::new(EchoHandler))?;
        install_filters(acceptor.service(), cli.handler_threads)?;
        let local_addr = acceptor.bind(addr)?;
        info!("listening tcp {}, try `nc {} {}`", local_addr, cli.host, cli.port);
        LocalExecutorBuilder::new().run(async {
            let _ = stop.await;
            acceptor.service().dispose().await;
        })?;
    }
    info!("stopped");

    Ok(())
}
