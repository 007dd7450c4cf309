use std::{sync::Arc, thread, time::Duration};

use sdr_stream::{
    transport::sim::SimTransport, Completed, Direction, Format, NextBuffer, Stream, StreamConfig,
};

fn main() {
    env_logger::init();
    let transport = Arc::new(SimTransport::auto());

    let rx_config = StreamConfig::new(Direction::Rx, Format::Sc16Q11)
        .with_num_transfers(8)
        .with_samples_per_buffer(4096);
    let buffer_bytes = rx_config.buffer_bytes();

    let mut received = 0;
    let rx_callback = move |done: Option<Completed>| match done {
        None => NextBuffer::Buffer(vec![0; buffer_bytes]),
        Some(_) if received >= 1_000_000 => {
            println!("Received {received} samples");
            NextBuffer::Shutdown
        }
        Some(c) => {
            received += c.num_samples;
            NextBuffer::Buffer(c.buffer)
        }
    };
    let rx = Stream::new(transport.clone(), rx_config, rx_callback).unwrap();
    rx.run().unwrap();
    let rx_submitted = transport.submitted();

    let tx_config = StreamConfig::new(Direction::Tx, Format::Sc16Q11).with_num_transfers(4);
    let buffer_bytes = tx_config.buffer_bytes();
    let tx_callback = |_: Option<Completed>| NextBuffer::NoData;
    let tx = Stream::new(transport.clone(), tx_config, tx_callback).unwrap();

    thread::scope(|s| {
        let events = s.spawn(|| tx.run());
        for _ in 0..64 {
            tx.submit_buffer(vec![0; buffer_bytes], Some(Duration::from_secs(1)))
                .unwrap();
        }
        tx.shutdown();
        events.join().unwrap().unwrap();
    });

    println!("Sent {} buffers", transport.submitted() - rx_submitted);
}
