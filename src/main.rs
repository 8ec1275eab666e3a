use clap::Parser;
use crossbeam_channel::bounded;
use meg_daq::acquire::{
    Acquisition, AcquisitionConfig, AlwaysOverwrite, NeverOverwrite, OverwritePrompt,
};
use meg_daq::args::{convert_filter, Args};
use tracing::info;

fn main() -> meg_daq::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    let config = AcquisitionConfig {
        host: args.host,
        command_port: args.command_port,
        data_port: args.data_port,
        output_path: args.output,
        write_to_file: !args.no_write,
    };
    let prompt: Box<dyn OverwritePrompt> = if args.force {
        Box::new(AlwaysOverwrite)
    } else {
        Box::new(NeverOverwrite)
    };
    let mut daq = Acquisition::new(config, prompt);

    // Subscribe before connecting so the handshake can't race us
    let info_rx = daq.subscribe_device_info();
    daq.connect()?;
    let device = info_rx.recv().map_err(|_| meg_daq::Error::NotConnected)?;
    info!(
        nchan = device.nchan,
        sfreq = device.sfreq,
        "device metadata negotiated, starting session"
    );

    daq.start()?;

    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .unwrap();
    let _ = stop_rx.recv();

    info!("interrupted, stopping acquisition");
    daq.stop();
    daq.wait_quiescent();
    daq.shutdown();
    Ok(())
}
