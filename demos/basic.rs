// Copyright 2020 Joyent, Inc.

use std::sync::{Arc, Mutex};
use std::thread;

use slog::{info, o, Drain, Logger};

use bankshot::connection::Connection;
use bankshot::driver::{Driver, DriverOptions};
use bankshot::endpoint::Endpoint;
use bankshot::error::Error;

#[derive(Debug)]
pub struct DummyConnection {
    endpoint: Endpoint,
    connected: bool,
}

impl DummyConnection {
    fn new(endpoint: &Endpoint) -> Self {
        DummyConnection {
            endpoint: endpoint.clone(),
            connected: false,
        }
    }

    fn request(&mut self, payload: &str) -> Result<String, Error> {
        // A real connection would write the payload and read a reply. The
        // dummy pretends every endpoint except h2 answers.
        if self.endpoint.host == "h2" {
            Err(Error::Driver(String::from("connection reset")))
        } else {
            Ok(format!("{} -> echo: {}", self.endpoint, payload))
        }
    }
}

impl Connection for DummyConnection {
    type Error = Error;

    fn connect(&mut self) -> Result<(), Error> {
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.connected = false;
        Ok(())
    }
}

fn main() {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let log = Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => "0.1.0"),
    );

    info!(log, "running basic bankshot example");

    let options = DriverOptions {
        endpoints: vec![
            Endpoint::new("h1", 55555),
            Endpoint::new("h2", 55556),
            Endpoint::new("h3", 55557),
        ],
        max_connections_per_endpoint: Some(2),
        retry_limit: Some(3),
        log: Some(log.clone()),
        ..Default::default()
    };

    let driver = Arc::new(Driver::new(options, |endpoint: &Endpoint| {
        DummyConnection::new(endpoint)
    }));

    // Share the driver across a handful of caller threads. Sends against h2
    // fail, so the driver blacklists it and fails over to a healthy
    // endpoint.
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let driver = driver.clone();
            let log = log.clone();
            thread::spawn(move || {
                let reply = driver.send(
                    |conn: &mut DummyConnection| conn.request("ping"),
                    Some(1000),
                );
                match reply {
                    Ok(reply) => info!(log, "caller {}: {}", i, reply),
                    Err(err) => info!(log, "caller {} failed: {}", i, err),
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }

    let h2 = Endpoint::new("h2", 55556);
    info!(log, "h2 blacklisted: {}", driver.is_blacklisted(&h2));

    driver.close();
}
