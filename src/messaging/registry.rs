use std::collections::hash_map::Entry;
use std::sync::RwLock;

use anyhow::bail;
use rustc_hash::FxHashMap;

use crate::messaging::message::{MessageDescriptor, TypeTag};
use crate::messaging::system_messages;


/// Assigns a stable [TypeTag] to every registered message variant and resolves tags back to
///  their descriptors when frames arrive.
///
/// Tag assignment is deterministic for a given input set: registration sorts the descriptors
///  by canonical name and hands out tags starting at 1, skipping names that are already
///  registered. Two peers that register the same variants therefore agree on every tag - this
///  is the interop contract, there is no tag negotiation on the wire.
///
/// The registry is additive: a tag, once assigned, is never reassigned or removed.
pub struct MessageRegistry {
    inner: RwLock<RegistryInner>,
}

struct RegistryInner {
    by_tag: FxHashMap<TypeTag, MessageDescriptor>,
    by_name: FxHashMap<&'static str, TypeTag>,
    next_tag: u16,
}

impl MessageRegistry {
    /// A registry with the built-in system messages already registered. User variants come on
    ///  top via [MessageRegistry::register].
    pub fn new() -> MessageRegistry {
        let registry = MessageRegistry {
            inner: RwLock::new(RegistryInner {
                by_tag: Default::default(),
                by_name: Default::default(),
                next_tag: 1,
            }),
        };
        registry.register(system_messages::descriptors())
            .expect("registering system messages into an empty registry cannot fail");
        registry
    }

    /// Registers a set of message variants. Both peers must call this with the same input set
    ///  (registration order within the set does not matter, the registry sorts).
    ///
    /// Already-registered names are skipped, so repeated registration is harmless.
    pub fn register(&self, descriptors: impl IntoIterator<Item = MessageDescriptor>) -> anyhow::Result<()> {
        let mut sorted = descriptors.into_iter().collect::<Vec<_>>();
        sorted.sort_by_key(|d| d.name);

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *inner;
        for descriptor in sorted {
            if inner.by_name.contains_key(descriptor.name) {
                continue;
            }
            if inner.next_tag == 0 {
                bail!("no free type tags left");
            }

            let tag = TypeTag(inner.next_tag);
            match inner.by_tag.entry(tag) {
                Entry::Occupied(_) => {
                    bail!("duplicate tag {:?} when registering {}", tag, descriptor.name);
                }
                Entry::Vacant(e) => {
                    let name = descriptor.name;
                    e.insert(descriptor);
                    inner.by_name.insert(name, tag);
                    inner.next_tag = inner.next_tag.wrapping_add(1);
                }
            }
        }
        Ok(())
    }

    /// The tag assigned to `name`, or [TypeTag::UNKNOWN] if the variant was never registered.
    pub fn tag_of(&self, name: &str) -> TypeTag {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
            .by_name
            .get(name)
            .copied()
            .unwrap_or(TypeTag::UNKNOWN)
    }

    pub fn descriptor_for(&self, tag: TypeTag) -> Option<MessageDescriptor> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
            .by_tag
            .get(&tag)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::messaging::system_messages::{Identification, InactivityCheck, LoginConfirmation};
    use crate::messaging::message::MessageVariant;
    use crate::test_util::StringMessage;

    #[test]
    fn test_system_messages_preregistered() {
        let registry = MessageRegistry::new();

        // lexicographic by canonical name
        assert_eq!(registry.tag_of(Identification::NAME), TypeTag(1));
        assert_eq!(registry.tag_of(InactivityCheck::NAME), TypeTag(2));
        assert_eq!(registry.tag_of(LoginConfirmation::NAME), TypeTag(3));
    }

    #[test]
    fn test_unregistered_is_unknown() {
        let registry = MessageRegistry::new();
        assert_eq!(registry.tag_of("no::such::Message"), TypeTag::UNKNOWN);
        assert!(registry.descriptor_for(TypeTag(200)).is_none());
    }

    #[test]
    fn test_reverse_lookup() {
        let registry = MessageRegistry::new();
        registry.register([StringMessage::descriptor()]).unwrap();

        let tag = registry.tag_of(StringMessage::NAME);
        assert!(tag.0 >= 1);
        let descriptor = registry.descriptor_for(tag).unwrap();
        assert_eq!(descriptor.name, StringMessage::NAME);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let registry = MessageRegistry::new();
        registry.register([StringMessage::descriptor()]).unwrap();
        let tag = registry.tag_of(StringMessage::NAME);

        registry.register([StringMessage::descriptor()]).unwrap();
        assert_eq!(registry.tag_of(StringMessage::NAME), tag);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_assignment_is_order_independent() {
        fn other_descriptor() -> crate::messaging::message::MessageDescriptor {
            crate::messaging::message::MessageDescriptor {
                name: "aaa::First",
                permitted_sender: crate::messaging::message::PermittedSender::ClientOrHost,
                deser: StringMessage::deser_boxed,
            }
        }

        let a = MessageRegistry::new();
        a.register([StringMessage::descriptor(), other_descriptor()]).unwrap();

        let b = MessageRegistry::new();
        b.register([other_descriptor(), StringMessage::descriptor()]).unwrap();

        assert_eq!(a.tag_of(StringMessage::NAME), b.tag_of(StringMessage::NAME));
        assert_eq!(a.tag_of("aaa::First"), b.tag_of("aaa::First"));
    }
}
