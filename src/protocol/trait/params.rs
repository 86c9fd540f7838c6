use auto_impl::auto_impl;

use crate::error::Result;
use crate::protocol::r#trait::param::{Param, ParamType};
use crate::protocol::value::write_null_bitmap;

/// Parameter list bound to a prepared statement execution
///
/// Implemented for `()`, slices, arrays, vectors and tuples of [`Param`].
#[auto_impl(&)]
pub trait Params {
    /// Number of parameters
    fn len(&self) -> usize;

    /// Parameter at `index`
    fn get(&self, index: usize) -> Option<&dyn Param>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runtime types of all parameters, in order
    fn param_types(&self) -> Vec<ParamType> {
        (0..self.len())
            .map(|i| self.get(i).map_or(ParamType::NULL, |p| p.param_type()))
            .collect()
    }

    /// Write the NULL bitmap: (num_params + 7) / 8 bytes, bit i set when parameter i is NULL
    fn write_null_bitmap(&self, out: &mut Vec<u8>) {
        write_null_bitmap(out, self.len(), 0, |i| self.get(i).is_none_or(|p| p.is_null()));
    }

    /// Write parameter values; NULL parameters are skipped (they're already in the bitmap)
    fn write_values(&self, out: &mut Vec<u8>) -> Result<()> {
        for i in 0..self.len() {
            if let Some(param) = self.get(i)
                && !param.is_null()
            {
                param.encode_value(out)?;
            }
        }
        Ok(())
    }
}

/// Empty parameters (no parameters)
impl Params for () {
    fn len(&self) -> usize {
        0
    }

    fn get(&self, _index: usize) -> Option<&dyn Param> {
        None
    }
}

impl<P: Param> Params for [P] {
    fn len(&self) -> usize {
        <[P]>::len(self)
    }

    fn get(&self, index: usize) -> Option<&dyn Param> {
        <[P]>::get(self, index).map(|p| p as &dyn Param)
    }
}

impl<P: Param, const N: usize> Params for [P; N] {
    fn len(&self) -> usize {
        N
    }

    fn get(&self, index: usize) -> Option<&dyn Param> {
        self.as_slice().get(index).map(|p| p as &dyn Param)
    }
}

impl<P: Param> Params for Vec<P> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn get(&self, index: usize) -> Option<&dyn Param> {
        self.as_slice().get(index).map(|p| p as &dyn Param)
    }
}

macro_rules! impl_params_for_tuple {
    ($len:literal; $($idx:tt: $T:ident),+) => {
        impl<$($T: Param),+> Params for ($($T,)+) {
            fn len(&self) -> usize {
                $len
            }

            fn get(&self, index: usize) -> Option<&dyn Param> {
                match index {
                    $($idx => Some(&self.$idx),)+
                    _ => None,
                }
            }
        }
    };
}

impl_params_for_tuple!(1; 0: A);
impl_params_for_tuple!(2; 0: A, 1: B);
impl_params_for_tuple!(3; 0: A, 1: B, 2: C);
impl_params_for_tuple!(4; 0: A, 1: B, 2: C, 3: D);
impl_params_for_tuple!(5; 0: A, 1: B, 2: C, 3: D, 4: E);
impl_params_for_tuple!(6; 0: A, 1: B, 2: C, 3: D, 4: E, 5: F);
impl_params_for_tuple!(7; 0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G);
impl_params_for_tuple!(8; 0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G, 7: H);
impl_params_for_tuple!(9; 0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G, 7: H, 8: I);
impl_params_for_tuple!(10; 0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G, 7: H, 8: I, 9: J);
impl_params_for_tuple!(11; 0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G, 7: H, 8: I, 9: J, 10: K);
impl_params_for_tuple!(12; 0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G, 7: H, 8: I, 9: J, 10: K, 11: L);
