// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use tianhe::error::Error;
use tianhe::server::run::run_server;

fn main() -> Result<(), Error> {
    run_server()
}
