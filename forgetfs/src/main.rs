use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use structopt::StructOpt;
use tracing::debug;

use fuse_conn::{serve, CancelScope, Channel, Connection, DevFuse, OpLogger};

mod fs;

#[derive(Debug, StructOpt)]
struct Args {
    #[structopt(name = "TARGET", help = "The mount point of forgetfs")]
    target: PathBuf,

    #[structopt(long, help = "Log every operation to stderr")]
    debug_ops: bool,
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

fn main() -> io::Result<()> {
    setup_tracing();
    let args = Args::from_args();
    async_std::task::block_on(run(args))
}

async fn run(args: Args) -> io::Result<()> {
    let cwd = env::current_dir()?;
    let target = cwd.join(&args.target);

    debug!(target = %target.display(), "mounting forgetfs");

    let channel: Arc<dyn Channel> = Arc::new(DevFuse::mount(target).await?);

    let debug_log = if args.debug_ops {
        Some(OpLogger::stderr())
    } else {
        None
    };

    let conn = Connection::new(
        CancelScope::root(),
        debug_log,
        Some(OpLogger::stderr()),
        channel,
    );
    conn.ready().await?;

    let fs = Arc::new(fs::ForgetFs::new());
    serve(conn, Arc::clone(&fs)).await?;

    // after unmount, every issued inode must have been forgotten
    fs.check();

    Ok(())
}
