// Links the bundled modules so their `register_module!` entries reach inventory.
// Modules outside this workspace are loaded from plugin directories instead.
#![allow(unused_imports)]

use product_consumer as _;
use product_provider as _;
