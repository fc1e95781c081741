use crate::JsonIndex;
use serde::de::DeserializeOwned;

impl<T: DeserializeOwned> JsonIndex<T> {
    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First record matching `pred`, in key order.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        self.load().into_values().find(|v| pred(v))
    }
}
