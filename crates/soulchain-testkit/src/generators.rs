//! Proptest generators for property-based testing.

use proptest::prelude::*;

use soulchain_core::{DocType, Keypair};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate any document type.
pub fn doc_type() -> impl Strategy<Value = DocType> {
    prop::sample::select(DocType::ALL.to_vec())
}

/// Generate file content of at most `max_len` bytes.
pub fn content(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// A markdown file whose stem names its type, e.g. `notes/LOVE-MAP.md`,
/// paired with that type.
pub fn typed_path() -> impl Strategy<Value = (String, DocType)> {
    (doc_type(), "([a-z]{1,8}/){0,2}", any::<bool>()).prop_map(|(doc_type, dir, upper)| {
        let stem = doc_type.name().replace('_', "-");
        let stem = if upper { stem.to_ascii_uppercase() } else { stem };
        (format!("{dir}{stem}.md"), doc_type)
    })
}

/// Parameters for a run of writes to one document.
#[derive(Debug, Clone)]
pub struct WriteSequence {
    pub keypair: Keypair,
    pub doc_type: DocType,
    pub versions: Vec<Vec<u8>>,
}

impl WriteSequence {
    /// A workspace path that resolves to this sequence's type.
    pub fn path(&self) -> String {
        format!("{}.md", self.doc_type.name().to_ascii_uppercase())
    }
}

impl Arbitrary for WriteSequence {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            doc_type(),
            prop::collection::vec(content(256), 1..6),
        )
            .prop_map(|(seed, doc_type, versions)| WriteSequence {
                keypair: Keypair::from_seed(&seed),
                doc_type,
                versions,
            })
            .boxed()
    }
}
