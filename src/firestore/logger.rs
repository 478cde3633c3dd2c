use std::sync::LazyLock;

use crate::logger::Logger;

pub(crate) static CODEC_LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@firestore/codec"));

pub(crate) static PAGINATION_LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@firestore/pagination"));

pub(crate) static DATASTORE_LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@firestore/datastore"));
