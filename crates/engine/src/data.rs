use std::sync::Arc;

use foundation::ResourceScope;
use tracing::debug;

use crate::device::{Device, EngineError, SharedView};
use crate::handle::Handle;
use crate::types::DataType;

/// Registers exactly one release of `handle` on `scope`.
pub fn defer_release(
    scope: &mut ResourceScope,
    device: &Arc<dyn Device>,
    handle: Handle,
) -> Result<(), EngineError> {
    let device = device.clone();
    scope.defer(move || device.release(handle))?;
    Ok(())
}

fn checked_len(bytes: &[u8], ty: DataType, shape: [usize; 3]) -> Result<(), EngineError> {
    let actual = bytes.len();
    let expected = ty
        .byte_len(shape)
        .ok_or(EngineError::ShapeMismatch {
            expected: usize::MAX,
            actual,
        })?;
    if expected != actual {
        return Err(EngineError::ShapeMismatch { expected, actual });
    }
    Ok(())
}

/// Presents a host buffer to the engine as shared data, without copying.
///
/// The buffer is held by `scope` ahead of the view's release, so LIFO
/// teardown releases the view before the memory behind it goes away.
pub fn wrap_array<B>(
    device: &Arc<dyn Device>,
    scope: &mut ResourceScope,
    buffer: Arc<B>,
    ty: DataType,
    shape: [usize; 3],
) -> Result<Handle, EngineError>
where
    B: AsRef<[u8]> + Send + Sync + 'static,
{
    let bytes: &[u8] = (*buffer).as_ref();
    checked_len(bytes, ty, shape)?;
    let ptr = bytes.as_ptr();
    scope.hold(buffer)?;

    let view = SharedView::dense(ptr, ty, shape);
    // SAFETY: the buffer is kept alive by `scope` until after the release
    // registered below has run.
    let handle = unsafe { device.new_shared_data(view)? };
    defer_release(scope, device, handle)?;
    debug!(%handle, ?ty, ?shape, "wrapped shared array");
    Ok(handle)
}

/// Copies a host buffer into engine-owned storage. The temporary shared view
/// is released before returning, so the buffer may be dropped right after.
pub fn wrap_array_copied<B>(
    device: &Arc<dyn Device>,
    scope: &mut ResourceScope,
    buffer: &B,
    ty: DataType,
    shape: [usize; 3],
) -> Result<Handle, EngineError>
where
    B: AsRef<[u8]> + ?Sized,
{
    let bytes = buffer.as_ref();
    checked_len(bytes, ty, shape)?;

    let view = SharedView::dense(bytes.as_ptr(), ty, shape);
    // SAFETY: `bytes` outlives `shared`, which is released below before
    // this function returns.
    let shared = unsafe { device.new_shared_data(view)? };
    let owned = match device.new_data(ty, shape) {
        Ok(owned) => owned,
        Err(err) => {
            device.release(shared);
            return Err(err);
        }
    };
    let copied = device.copy_data(shared, owned);
    device.release(shared);
    if let Err(err) = copied {
        device.release(owned);
        return Err(err);
    }
    defer_release(scope, device, owned)?;
    Ok(owned)
}

/// Builds an engine array of object references. The array retains its
/// items, so the caller's own references are unaffected; the caller owns
/// the returned handle.
pub fn wrap_handles(
    device: &Arc<dyn Device>,
    ty: DataType,
    items: &[Handle],
) -> Result<Handle, EngineError> {
    if ty.object_kind().is_none() {
        return Err(EngineError::Unsupported(format!(
            "{ty:?} is not an object array type"
        )));
    }
    device.new_object_data(ty, items)
}

/// Pads a 1-3 dimensional shape to exactly three axes.
pub fn shape3(dims: &[usize]) -> Option<[usize; 3]> {
    match dims {
        [a] => Some([*a, 1, 1]),
        [a, b] => Some([*a, *b, 1]),
        [a, b, c] => Some([*a, *b, *c]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{shape3, wrap_array, wrap_array_copied, wrap_handles};
    use crate::device::{Device, EngineError};
    use crate::handle::ObjectKind;
    use crate::headless::HeadlessDevice;
    use crate::types::DataType;
    use foundation::ResourceScope;
    use std::sync::Arc;

    fn device() -> (Arc<HeadlessDevice>, Arc<dyn Device>) {
        let headless = Arc::new(HeadlessDevice::new());
        let device: Arc<dyn Device> = headless.clone();
        (headless, device)
    }

    #[test]
    fn shared_array_keeps_buffer_alive_until_scope_closes() {
        let (headless, device) = device();
        let buffer = Arc::new(vec![0u8; 3 * 12]);
        let mut scope = ResourceScope::new();

        let handle =
            wrap_array(&device, &mut scope, buffer.clone(), DataType::Vec3F, [3, 1, 1]).unwrap();
        assert_eq!(Arc::strong_count(&buffer), 2);
        assert_eq!(headless.refcount(handle), Some(1));

        scope.close();
        assert_eq!(Arc::strong_count(&buffer), 1);
        assert_eq!(headless.live_objects(), 0);
    }

    #[test]
    fn shape_must_match_byte_length() {
        let (headless, device) = device();
        let buffer = Arc::new(vec![0u8; 10]);
        let mut scope = ResourceScope::new();

        let err = wrap_array(&device, &mut scope, buffer, DataType::Vec2F, [2, 1, 1]).unwrap_err();
        assert_eq!(
            err,
            EngineError::ShapeMismatch {
                expected: 16,
                actual: 10
            }
        );
        assert_eq!(headless.live_objects(), 0);
    }

    #[test]
    fn oversized_shapes_fail_instead_of_overflowing() {
        let (headless, device) = device();
        let buffer = Arc::new(vec![0u8; 12]);
        let mut scope = ResourceScope::new();

        let shape = [usize::MAX, 2, 1];
        let err = wrap_array(&device, &mut scope, buffer, DataType::Vec3F, shape).unwrap_err();
        assert_eq!(
            err,
            EngineError::ShapeMismatch {
                expected: usize::MAX,
                actual: 12
            }
        );
        assert!(device.new_data(DataType::Vec4F, shape).is_err());
        assert_eq!(DataType::Vec4F.byte_len([2, 3, 1]), Some(96));
        assert_eq!(headless.live_objects(), 0);
    }

    #[test]
    fn copied_array_drops_the_shared_view_immediately() {
        let (headless, device) = device();
        let bytes = vec![1u8, 2, 3, 4];
        let mut scope = ResourceScope::new();

        let handle = wrap_array_copied(&device, &mut scope, &bytes[..], DataType::UChar, [4, 1, 1])
            .unwrap();
        drop(bytes);
        assert_eq!(headless.live_objects(), 1);
        assert_eq!(headless.data_bytes(handle), Some(vec![1, 2, 3, 4]));

        scope.close();
        assert_eq!(headless.live_objects(), 0);
    }

    #[test]
    fn object_arrays_retain_their_items() {
        let (headless, device) = device();
        let model = device.new_object(ObjectKind::GeometricModel, "").unwrap();
        let array = wrap_handles(&device, DataType::GeometricModel, &[model]).unwrap();
        assert_eq!(headless.refcount(model), Some(2));

        device.release(model);
        assert_eq!(headless.refcount(model), Some(1));
        device.release(array);
        assert_eq!(headless.live_objects(), 0);
    }

    #[test]
    fn plain_types_are_not_object_arrays() {
        let (_, device) = device();
        assert!(matches!(
            wrap_handles(&device, DataType::Vec3F, &[]),
            Err(EngineError::Unsupported(_))
        ));
    }

    #[test]
    fn shapes_pad_to_three_axes() {
        assert_eq!(shape3(&[5]), Some([5, 1, 1]));
        assert_eq!(shape3(&[5, 2]), Some([5, 2, 1]));
        assert_eq!(shape3(&[5, 2, 3]), Some([5, 2, 3]));
        assert_eq!(shape3(&[]), None);
        assert_eq!(shape3(&[1, 1, 1, 1]), None);
    }
}
