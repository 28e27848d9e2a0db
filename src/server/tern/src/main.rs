// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use logger::{Level, Logger};

fn main() {
    Logger::new()
        .label("tern")
        .level(Level::Info)
        .init()
        .expect("failed to initialize logger");

    tern_server::run(std::env::args().nth(1));
}
