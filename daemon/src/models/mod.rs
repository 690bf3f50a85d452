macro_rules! import_models {
    ($x:ident) => {
        mod $x;
        pub use self::$x::*;
    };
}

import_models!(artifact);
import_models!(build);
import_models!(builder);
import_models!(chroot);
import_models!(distro_arch_series);
import_models!(queue);
import_models!(source_package);
